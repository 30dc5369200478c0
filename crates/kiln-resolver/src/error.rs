use kiln_artifact::ArtifactError;
use kiln_pipeline::PipelineError;
use thiserror::Error;

/// Errors that can occur while resolving a pipeline definition.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// No factory is registered for the task kind.
  #[error("unknown task kind '{kind}' (task #{index})")]
  UnknownTask { index: usize, kind: String },

  /// An artifact reference could not be parsed.
  #[error("invalid artifact reference in task '{task}': {source}")]
  InvalidReference {
    task: String,
    #[source]
    source: ArtifactError,
  },

  /// A factory rejected the task's options.
  #[error("invalid options for task '{task}': {message}")]
  InvalidOptions { task: String, message: String },

  /// The cache backend could not be created.
  #[error("failed to set up cache: {0}")]
  Cache(#[source] ArtifactError),

  /// Registration or validation failed.
  #[error(transparent)]
  Pipeline(#[from] PipelineError),
}

impl ResolveError {
  pub fn invalid_options(task: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidOptions {
      task: task.into(),
      message: message.into(),
    }
  }
}
