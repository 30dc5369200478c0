use kiln_artifact::{ArtifactError, ArtifactReference, CleanupError};
use kiln_scheduler::ScheduleError;
use kiln_task::TaskError;
use thiserror::Error;

/// Errors that abort building or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
  /// Declared dependencies cannot be satisfied or ordered.
  #[error("invalid pipeline: {0}")]
  Schedule(#[from] ScheduleError),

  /// A task's input, output or parameter artifact cannot be resolved.
  #[error("unsatisfied dependency of task '{task}': {message}")]
  Dependency {
    task: String,
    message: String,
    #[source]
    source: Option<ArtifactError>,
  },

  /// A registration or context is missing something the task needs.
  #[error("invalid parameters for task '{task}': {message}")]
  Parameter { task: String, message: String },

  /// The task failed while running.
  #[error("task '{task}' failed: {source}")]
  Execution {
    task: String,
    #[source]
    source: TaskError,
  },

  /// Temporary resources of a task could not be released.
  #[error("failed to release resources of task '{task}': {source}")]
  Cleanup {
    task: String,
    #[source]
    source: CleanupError,
  },

  /// Run-wide resources could not be released.
  #[error("failed to release pipeline resources: {source}")]
  Release {
    #[source]
    source: CleanupError,
  },
}

impl PipelineError {
  pub fn dependency(task: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Dependency {
      task: task.into(),
      message: message.into(),
      source: None,
    }
  }

  pub fn parameter(task: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Parameter {
      task: task.into(),
      message: message.into(),
    }
  }

  pub(crate) fn missing_manager(task: &str, reference: &ArtifactReference) -> Self {
    Self::dependency(
      task,
      format!(
        "cannot resolve artifact {} without a configured artifact manager",
        reference
      ),
    )
  }

  /// Map an error returned by `Task::execute`.
  pub fn from_task(task: impl Into<String>, error: TaskError) -> Self {
    match error {
      TaskError::Parameter { message } => Self::Parameter {
        task: task.into(),
        message,
      },
      source => Self::Execution {
        task: task.into(),
        source,
      },
    }
  }

  /// Name of the task the error belongs to, if any.
  pub fn task(&self) -> Option<&str> {
    match self {
      Self::Dependency { task, .. }
      | Self::Parameter { task, .. }
      | Self::Execution { task, .. }
      | Self::Cleanup { task, .. } => Some(task),
      Self::Schedule(_) | Self::Release { .. } => None,
    }
  }

  /// Unsatisfiable task or artifact dependencies.
  pub fn is_dependency(&self) -> bool {
    matches!(self, Self::Schedule(_) | Self::Dependency { .. })
  }

  /// Failures while running a task, parameter failures included.
  pub fn is_execution(&self) -> bool {
    matches!(self, Self::Execution { .. } | Self::Parameter { .. })
  }

  pub fn is_parameter(&self) -> bool {
    matches!(self, Self::Parameter { .. })
  }

  pub fn is_cleanup(&self) -> bool {
    matches!(self, Self::Cleanup { .. } | Self::Release { .. })
  }
}
