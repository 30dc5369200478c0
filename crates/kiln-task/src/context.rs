use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_artifact::{ArtifactManager, CleanupError};

use crate::error::TaskError;
use crate::resource::ResourceScope;

/// What a task sees while it runs.
///
/// Paths are resolved by the engine before `execute` is called. Temporary
/// files and directories allocated through the context are deleted when the
/// invocation ends.
#[derive(Debug)]
pub struct Context {
  task: String,
  input: Option<PathBuf>,
  output: Option<PathBuf>,
  parameters: HashMap<String, PathBuf>,
  artifacts: Option<Arc<ArtifactManager>>,
  resources: ResourceScope,
}

impl Context {
  pub fn builder(task: impl Into<String>) -> ContextBuilder {
    ContextBuilder {
      task: task.into(),
      input: None,
      output: None,
      parameters: HashMap::new(),
      artifacts: None,
      resources: None,
    }
  }

  /// Name of the task this context belongs to.
  pub fn task_name(&self) -> &str {
    &self.task
  }

  pub fn input_path(&self) -> Option<&Path> {
    self.input.as_deref()
  }

  pub fn required_input_path(&self) -> Result<&Path, TaskError> {
    self
      .input_path()
      .ok_or_else(|| TaskError::parameter(format!("{}: input path is required", self.task)))
  }

  pub fn output_path(&self) -> Option<&Path> {
    self.output.as_deref()
  }

  pub fn required_output_path(&self) -> Result<&Path, TaskError> {
    self
      .output_path()
      .ok_or_else(|| TaskError::parameter(format!("{}: output path is required", self.task)))
  }

  pub fn parameter_path(&self, name: &str) -> Option<&Path> {
    self.parameters.get(name).map(PathBuf::as_path)
  }

  pub fn required_parameter_path(&self, name: &str) -> Result<&Path, TaskError> {
    self.parameter_path(name).ok_or_else(|| {
      TaskError::parameter(format!("{}: parameter '{}' is required", self.task, name))
    })
  }

  pub fn parameters(&self) -> &HashMap<String, PathBuf> {
    &self.parameters
  }

  pub fn artifact_manager(&self) -> Option<&ArtifactManager> {
    self.artifacts.as_deref()
  }

  pub fn required_artifact_manager(&self) -> Result<&ArtifactManager, TaskError> {
    self.artifact_manager().ok_or_else(|| {
      TaskError::parameter(format!("{}: an artifact manager is required", self.task))
    })
  }

  /// Allocate an empty directory deleted when the invocation ends.
  pub async fn allocate_temporary_directory(&mut self) -> Result<PathBuf, TaskError> {
    self
      .resources
      .allocate_directory()
      .await
      .map_err(|e| TaskError::caused_by("failed to allocate temporary directory", e))
  }

  /// Allocate an empty file deleted when the invocation ends.
  pub async fn allocate_temporary_file(&mut self) -> Result<PathBuf, TaskError> {
    self
      .resources
      .allocate_file()
      .await
      .map_err(|e| TaskError::caused_by("failed to allocate temporary file", e))
  }

  /// Release every temporary resource allocated through this context.
  pub fn close(mut self) -> Result<(), CleanupError> {
    self.resources.release()
  }
}

/// Assembles a [`Context`] for one invocation.
#[derive(Debug)]
pub struct ContextBuilder {
  task: String,
  input: Option<PathBuf>,
  output: Option<PathBuf>,
  parameters: HashMap<String, PathBuf>,
  artifacts: Option<Arc<ArtifactManager>>,
  resources: Option<ResourceScope>,
}

impl ContextBuilder {
  pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
    self.input = Some(path.into());
    self
  }

  pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
    self.output = Some(path.into());
    self
  }

  pub fn parameter(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
    self.parameters.insert(name.into(), path.into());
    self
  }

  pub fn artifact_manager(mut self, manager: Arc<ArtifactManager>) -> Self {
    self.artifacts = Some(manager);
    self
  }

  /// Allocate temporaries in the given scope instead of a fresh one.
  pub fn resources(mut self, scope: ResourceScope) -> Self {
    self.resources = Some(scope);
    self
  }

  pub fn build(self) -> Context {
    Context {
      task: self.task,
      input: self.input,
      output: self.output,
      parameters: self.parameters,
      artifacts: self.artifacts,
      resources: self.resources.unwrap_or_default(),
    }
  }
}
