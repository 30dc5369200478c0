use std::collections::BTreeSet;

use kiln_artifact::ArtifactReference;
use kiln_task::{Task, TaskKind};

/// Scheduling view of one registration.
#[derive(Debug, Clone, Default)]
pub struct TaskNode {
  pub name: String,
  /// The task's kind plus its capabilities.
  pub kinds: BTreeSet<TaskKind>,
  pub required_tasks: BTreeSet<TaskKind>,
  pub optional_tasks: BTreeSet<TaskKind>,
  /// Artifacts another task must produce.
  pub required_artifacts: BTreeSet<ArtifactReference>,
  /// Artifacts read through bindings. They order the task after a producer
  /// when one is registered but may also come from the cache.
  pub consumed_artifacts: BTreeSet<ArtifactReference>,
  pub produced_artifacts: BTreeSet<ArtifactReference>,
}

impl TaskNode {
  pub fn from_task(task: &dyn Task) -> Self {
    let mut kinds = task.capabilities();
    kinds.insert(task.kind());

    Self {
      name: task.name(),
      kinds,
      required_tasks: task.required_tasks(),
      optional_tasks: task.optional_tasks(),
      required_artifacts: task.required_artifacts(),
      consumed_artifacts: BTreeSet::new(),
      produced_artifacts: task.created_artifacts(),
    }
  }

  pub fn consumes(&mut self, reference: ArtifactReference) {
    self.consumed_artifacts.insert(reference);
  }

  pub fn produces(&mut self, reference: ArtifactReference) {
    self.produced_artifacts.insert(reference);
  }

  pub fn satisfies(&self, kind: &TaskKind) -> bool {
    self.kinds.contains(kind)
  }
}
