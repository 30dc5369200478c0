use thiserror::Error;

/// Errors a task reports from `execute`.
#[derive(Debug, Error)]
pub enum TaskError {
  /// A value the task needs was not supplied by its registration.
  #[error("{message}")]
  Parameter { message: String },

  /// The task ran and failed.
  #[error("{message}")]
  Execution {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
  },
}

impl TaskError {
  pub fn parameter(message: impl Into<String>) -> Self {
    Self::Parameter {
      message: message.into(),
    }
  }

  pub fn execution(message: impl Into<String>) -> Self {
    Self::Execution {
      message: message.into(),
      source: None,
    }
  }

  /// Wrap an underlying error with a message describing what was attempted.
  pub fn caused_by(
    message: impl Into<String>,
    source: impl std::error::Error + Send + Sync + 'static,
  ) -> Self {
    Self::Execution {
      message: message.into(),
      source: Some(Box::new(source)),
    }
  }

  pub fn is_parameter(&self) -> bool {
    matches!(self, Self::Parameter { .. })
  }
}
