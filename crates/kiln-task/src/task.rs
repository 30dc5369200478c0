use std::collections::BTreeSet;

use async_trait::async_trait;
use kiln_artifact::{Artifact, ArtifactReference};

use crate::context::Context;
use crate::error::TaskError;
use crate::kind::TaskKind;

/// A unit of work in a pipeline.
///
/// Only `kind` and `execute` are mandatory. The remaining methods describe
/// how the task relates to others and what its registration must supply;
/// their defaults declare no dependencies, no required input or output and
/// no parameters.
#[async_trait]
pub trait Task: Send + Sync {
  /// Stable identifier of what this task does.
  fn kind(&self) -> TaskKind;

  /// Human-readable name used in logs and errors.
  fn name(&self) -> String {
    self.kind().to_string()
  }

  /// Further kinds this task can stand in for.
  fn capabilities(&self) -> BTreeSet<TaskKind> {
    BTreeSet::new()
  }

  /// Kinds that must be registered and scheduled before this task.
  fn required_tasks(&self) -> BTreeSet<TaskKind> {
    BTreeSet::new()
  }

  /// Kinds that, when registered, are scheduled before this task.
  fn optional_tasks(&self) -> BTreeSet<TaskKind> {
    BTreeSet::new()
  }

  /// Artifacts some other registered task must produce first.
  fn required_artifacts(&self) -> BTreeSet<ArtifactReference> {
    BTreeSet::new()
  }

  /// Artifacts this task produces.
  fn created_artifacts(&self) -> BTreeSet<ArtifactReference> {
    BTreeSet::new()
  }

  fn requires_input(&self) -> bool {
    false
  }

  fn requires_output(&self) -> bool {
    false
  }

  /// Names of every parameter this task accepts.
  fn available_parameters(&self) -> BTreeSet<String> {
    BTreeSet::new()
  }

  /// Names that must be bound at registration.
  fn required_parameters(&self) -> BTreeSet<String> {
    self.available_parameters()
  }

  /// Whether an existing artifact at the output reference is still good.
  ///
  /// Returning `true` lets the engine skip `execute` for a non-forced
  /// registration.
  async fn is_valid_artifact(&self, _artifact: &Artifact) -> bool {
    true
  }

  async fn execute(&self, context: &mut Context) -> Result<(), TaskError>;
}

/// Helpers derived from the [`Task`] declarations.
pub trait TaskExt: Task {
  /// True when this task is of `kind` or advertises it as a capability.
  fn satisfies(&self, kind: &TaskKind) -> bool {
    self.kind() == *kind || self.capabilities().contains(kind)
  }
}

impl<T: Task + ?Sized> TaskExt for T {}
