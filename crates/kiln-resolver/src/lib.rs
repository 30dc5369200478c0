//! Turns a [`PipelineDef`](kiln_config::PipelineDef) into a runnable
//! [`Pipeline`](kiln_pipeline::Pipeline).
//!
//! Task kinds are looked up in a [`TaskRegistry`] of [`TaskFactory`]s. The
//! dependency declarations every definition may carry (`requires`, `after`,
//! `requires_artifacts`, `creates`) and the display name are layered on top
//! of whatever the factory builds.

mod declared;
mod error;
mod registry;
mod resolver;

pub use declared::DeclaredTask;
pub use error::ResolveError;
pub use registry::{TaskFactory, TaskRegistry};
pub use resolver::{Resolver, StandardResolver};
