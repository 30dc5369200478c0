use serde::{Deserialize, Serialize};

use crate::cache::CacheDef;
use crate::task::TaskDef;

/// A complete pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDef {
  pub name: String,

  /// Cache backend. Without one, artifacts only live for the run.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cache: Option<CacheDef>,

  pub tasks: Vec<TaskDef>,
}

impl PipelineDef {
  pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(content)
  }
}
