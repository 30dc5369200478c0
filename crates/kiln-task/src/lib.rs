//! The task contract for kiln pipelines.
//!
//! A [`Task`] is a unit of work that reads from an optional input path,
//! writes to an optional output path, and may take named path parameters.
//! The engine hands every invocation a [`Context`] that owns the temporary
//! resources allocated during the run; they are released when the
//! invocation ends regardless of its outcome.

mod context;
mod error;
mod kind;
mod resource;
mod task;

pub use context::{Context, ContextBuilder};
pub use error::TaskError;
pub use kind::TaskKind;
pub use resource::ResourceScope;
pub use task::{Task, TaskExt};
