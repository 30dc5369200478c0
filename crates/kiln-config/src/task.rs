use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::binding::BindingDef;

/// One task registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
  /// Kind of task, e.g. `"copy"` or `"command"`.
  pub task: String,

  /// Display name. Defaults to the task kind.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub input: Option<BindingDef>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<BindingDef>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub parameters: BTreeMap<String, BindingDef>,

  /// Run even when a valid output artifact exists.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub force: bool,

  /// Task-specific settings, interpreted by the task's factory.
  #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
  pub options: serde_json::Value,

  /// Kinds that must run first.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub requires: Vec<String>,

  /// Kinds that run first when present.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub after: Vec<String>,

  /// Artifacts another task must produce first.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub requires_artifacts: Vec<String>,

  /// Artifacts this task produces besides its output binding.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub creates: Vec<String>,
}

impl TaskDef {
  pub fn new(task: impl Into<String>) -> Self {
    Self {
      task: task.into(),
      name: None,
      input: None,
      output: None,
      parameters: BTreeMap::new(),
      force: false,
      options: serde_json::Value::Null,
      requires: Vec::new(),
      after: Vec::new(),
      requires_artifacts: Vec::new(),
      creates: Vec::new(),
    }
  }

  /// The display name, falling back to the kind.
  pub fn display_name(&self) -> &str {
    self.name.as_deref().unwrap_or(&self.task)
  }
}
