//! Ordering of pipeline tasks.
//!
//! The scheduler works on [`TaskNode`] descriptors rather than on tasks
//! themselves so the engine can fold registration bindings (input, output
//! and parameter artifacts) into the task's own declarations.

mod error;
mod node;
mod scheduler;

pub use error::{ScheduleError, Violation};
pub use node::TaskNode;
pub use scheduler::Scheduler;
