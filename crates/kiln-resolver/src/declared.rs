use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_artifact::{Artifact, ArtifactReference};
use kiln_task::{Context, Task, TaskError, TaskKind};

/// A task with a display name and dependency declarations added from its
/// definition. Everything else is delegated to the wrapped task.
pub struct DeclaredTask {
  inner: Arc<dyn Task>,
  name: Option<String>,
  required_tasks: BTreeSet<TaskKind>,
  optional_tasks: BTreeSet<TaskKind>,
  required_artifacts: BTreeSet<ArtifactReference>,
  created_artifacts: BTreeSet<ArtifactReference>,
}

impl DeclaredTask {
  pub fn new(inner: Arc<dyn Task>) -> Self {
    Self {
      inner,
      name: None,
      required_tasks: BTreeSet::new(),
      optional_tasks: BTreeSet::new(),
      required_artifacts: BTreeSet::new(),
      created_artifacts: BTreeSet::new(),
    }
  }

  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn requiring(mut self, kinds: impl IntoIterator<Item = TaskKind>) -> Self {
    self.required_tasks.extend(kinds);
    self
  }

  pub fn after(mut self, kinds: impl IntoIterator<Item = TaskKind>) -> Self {
    self.optional_tasks.extend(kinds);
    self
  }

  pub fn requiring_artifacts(
    mut self,
    references: impl IntoIterator<Item = ArtifactReference>,
  ) -> Self {
    self.required_artifacts.extend(references);
    self
  }

  pub fn creating(mut self, references: impl IntoIterator<Item = ArtifactReference>) -> Self {
    self.created_artifacts.extend(references);
    self
  }
}

#[async_trait]
impl Task for DeclaredTask {
  fn kind(&self) -> TaskKind {
    self.inner.kind()
  }

  fn name(&self) -> String {
    self.name.clone().unwrap_or_else(|| self.inner.name())
  }

  fn capabilities(&self) -> BTreeSet<TaskKind> {
    self.inner.capabilities()
  }

  fn required_tasks(&self) -> BTreeSet<TaskKind> {
    let mut kinds = self.inner.required_tasks();
    kinds.extend(self.required_tasks.iter().cloned());
    kinds
  }

  fn optional_tasks(&self) -> BTreeSet<TaskKind> {
    let mut kinds = self.inner.optional_tasks();
    kinds.extend(self.optional_tasks.iter().cloned());
    kinds
  }

  fn required_artifacts(&self) -> BTreeSet<ArtifactReference> {
    let mut references = self.inner.required_artifacts();
    references.extend(self.required_artifacts.iter().cloned());
    references
  }

  fn created_artifacts(&self) -> BTreeSet<ArtifactReference> {
    let mut references = self.inner.created_artifacts();
    references.extend(self.created_artifacts.iter().cloned());
    references
  }

  fn requires_input(&self) -> bool {
    self.inner.requires_input()
  }

  fn requires_output(&self) -> bool {
    self.inner.requires_output()
  }

  fn available_parameters(&self) -> BTreeSet<String> {
    self.inner.available_parameters()
  }

  fn required_parameters(&self) -> BTreeSet<String> {
    self.inner.required_parameters()
  }

  async fn is_valid_artifact(&self, artifact: &Artifact) -> bool {
    self.inner.is_valid_artifact(artifact).await
  }

  async fn execute(&self, context: &mut Context) -> Result<(), TaskError> {
    self.inner.execute(context).await
  }
}
