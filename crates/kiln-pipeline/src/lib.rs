//! Pipeline construction and execution.
//!
//! A [`Pipeline`] is built from [`TaskRegistration`]s, validated and ordered
//! once by the scheduler, then executed strictly one task at a time:
//!
//! ```text
//!   for each registration, in scheduled order:
//!
//!     resolve input ──► resolve output ──► skip check ──► execute
//!                                              │             │
//!                                          valid cached      ▼
//!                                           artifact     register output
//!                                              │             │
//!                                              └─────┬───────┘
//!                                                    ▼
//!                                            release resources
//! ```
//!
//! The first failing registration aborts the run. Temporary resources are
//! released on every path.

mod engine;
mod error;
pub mod events;
mod pipeline;
mod registration;

pub use error::PipelineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use pipeline::{ExecutionReport, Pipeline, PipelineBuilder, TaskOutcome, TaskStatus};
pub use registration::{Binding, TaskRegistration};
