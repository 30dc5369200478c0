use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which cache backend stores artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheDef {
  /// One flat directory.
  Local { path: PathBuf },
  /// A `group/artifact/version` hierarchy.
  Repository { path: PathBuf },
  /// A directory deleted when the run ends; nothing is ever reused.
  Temporary,
  /// Gzip-compressed tar archives.
  Archive { path: PathBuf },
}
