use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// An input, output or parameter binding.
///
/// Artifact references are kept as text
/// (`name:version[:classifier]:extension`) and parsed during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingDef {
  Path(PathBuf),
  Artifact(String),
}
