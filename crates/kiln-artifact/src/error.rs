use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving or storing artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
  /// A textual reference could not be parsed.
  #[error("invalid artifact reference '{value}': {message}")]
  InvalidReference { value: String, message: String },

  /// Filesystem access failed.
  #[error("i/o error at {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// Packing or unpacking an archive entry failed.
  #[error("archive error at {}: {source}", path.display())]
  Archive {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The artifact table lock was poisoned.
  #[error("artifact table lock poisoned: {message}")]
  Poisoned { message: String },
}

impl ArtifactError {
  pub fn invalid_reference(value: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidReference {
      value: value.into(),
      message: message.into(),
    }
  }

  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }
}
