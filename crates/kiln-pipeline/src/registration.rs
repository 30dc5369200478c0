use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_artifact::ArtifactReference;
use kiln_scheduler::TaskNode;
use kiln_task::Task;

use crate::error::PipelineError;

/// Where a task reads or writes: a plain path or an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
  File(PathBuf),
  Artifact(ArtifactReference),
}

impl Binding {
  pub fn artifact(&self) -> Option<&ArtifactReference> {
    match self {
      Binding::Artifact(reference) => Some(reference),
      Binding::File(_) => None,
    }
  }

  pub fn file(&self) -> Option<&Path> {
    match self {
      Binding::File(path) => Some(path),
      Binding::Artifact(_) => None,
    }
  }
}

/// A task together with its bindings.
///
/// Setting a file binding replaces an artifact binding for the same slot and
/// vice versa.
#[derive(Clone)]
pub struct TaskRegistration {
  task: Arc<dyn Task>,
  input: Option<Binding>,
  output: Option<Binding>,
  parameters: BTreeMap<String, Binding>,
  forced: bool,
}

impl TaskRegistration {
  pub fn new(task: impl Task + 'static) -> Self {
    Self::from_arc(Arc::new(task))
  }

  pub fn from_arc(task: Arc<dyn Task>) -> Self {
    Self {
      task,
      input: None,
      output: None,
      parameters: BTreeMap::new(),
      forced: false,
    }
  }

  pub fn with_input_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.input = Some(Binding::File(path.into()));
    self
  }

  pub fn with_input_artifact(mut self, reference: ArtifactReference) -> Self {
    self.input = Some(Binding::Artifact(reference));
    self
  }

  pub fn with_output_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.output = Some(Binding::File(path.into()));
    self
  }

  pub fn with_output_artifact(mut self, reference: ArtifactReference) -> Self {
    self.output = Some(Binding::Artifact(reference));
    self
  }

  pub fn with_parameter_file(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
    self
      .parameters
      .insert(name.into(), Binding::File(path.into()));
    self
  }

  pub fn with_parameter_artifact(
    mut self,
    name: impl Into<String>,
    reference: ArtifactReference,
  ) -> Self {
    self
      .parameters
      .insert(name.into(), Binding::Artifact(reference));
    self
  }

  /// Run the task even when a valid output artifact already exists.
  pub fn with_forced_execution(mut self, forced: bool) -> Self {
    self.forced = forced;
    self
  }

  pub fn task(&self) -> &Arc<dyn Task> {
    &self.task
  }

  pub fn name(&self) -> String {
    self.task.name()
  }

  pub fn input(&self) -> Option<&Binding> {
    self.input.as_ref()
  }

  pub fn output(&self) -> Option<&Binding> {
    self.output.as_ref()
  }

  pub fn parameters(&self) -> &BTreeMap<String, Binding> {
    &self.parameters
  }

  pub fn is_forced(&self) -> bool {
    self.forced
  }

  /// Every artifact this registration reads or writes through a binding.
  pub fn bound_artifacts(&self) -> impl Iterator<Item = &ArtifactReference> {
    self
      .input
      .iter()
      .chain(self.output.iter())
      .chain(self.parameters.values())
      .filter_map(Binding::artifact)
  }

  /// Check the bindings against what the task declares it needs.
  pub(crate) fn check(&self) -> Result<(), PipelineError> {
    let name = self.name();

    if self.task.requires_input() && self.input.is_none() {
      return Err(PipelineError::parameter(name, "input parameter is required"));
    }

    if self.task.requires_output() && self.output.is_none() {
      return Err(PipelineError::parameter(name, "output parameter is required"));
    }

    let available = self.task.available_parameters();
    let unknown: Vec<&str> = self
      .parameters
      .keys()
      .filter(|key| !available.contains(*key))
      .map(String::as_str)
      .collect();
    if !unknown.is_empty() {
      return Err(PipelineError::parameter(
        name,
        format!("no such parameter: {}", unknown.join(", ")),
      ));
    }

    let missing: Vec<String> = self
      .task
      .required_parameters()
      .into_iter()
      .filter(|required| !self.parameters.contains_key(required))
      .collect();
    if !missing.is_empty() {
      return Err(PipelineError::parameter(
        name,
        format!("missing required parameters: {}", missing.join(", ")),
      ));
    }

    Ok(())
  }

  /// Scheduling view combining the task's declarations with the bindings.
  pub(crate) fn node(&self) -> TaskNode {
    let mut node = TaskNode::from_task(self.task.as_ref());

    if let Some(reference) = self.output.as_ref().and_then(Binding::artifact) {
      node.produces(reference.clone());
    }

    let consumed = self
      .input
      .iter()
      .chain(self.parameters.values())
      .filter_map(Binding::artifact);
    for reference in consumed {
      node.consumes(reference.clone());
    }

    node
  }
}

impl fmt::Debug for TaskRegistration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskRegistration")
      .field("task", &self.task.name())
      .field("input", &self.input)
      .field("output", &self.output)
      .field("parameters", &self.parameters)
      .field("forced", &self.forced)
      .finish()
  }
}
