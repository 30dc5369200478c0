//! Execution of a single registration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_artifact::{Artifact, ArtifactManager, ArtifactReference, CleanupError, CleanupFailure};
use kiln_task::{Context, ResourceScope, TaskError};
use tracing::{debug, info, instrument, warn};

use crate::error::PipelineError;
use crate::events::ExecutionEvent;
use crate::pipeline::{Pipeline, TaskStatus};
use crate::registration::{Binding, TaskRegistration};

/// Name of the path handed to a task whose output is an artifact. The
/// enclosing scratch directory is allocated fresh for every invocation.
const OUTPUT: &str = "output";

/// Resources held for the duration of one invocation.
struct Invocation {
  scope: ResourceScope,
  opened: Vec<Arc<Artifact>>,
  failures: Vec<CleanupFailure>,
}

impl Invocation {
  fn new(scope: ResourceScope) -> Self {
    Self {
      scope,
      opened: Vec::new(),
      failures: Vec::new(),
    }
  }

  fn absorb(&mut self, result: Result<(), CleanupError>) {
    if let Err(e) = result {
      self.failures.extend(e.into_failures());
    }
  }

  /// Close opened artifacts and delete scratch directories.
  fn release(mut self) -> Result<(), CleanupError> {
    for artifact in std::mem::take(&mut self.opened) {
      let closed = artifact.close();
      self.absorb(closed);
    }
    let released = self.scope.release();
    self.absorb(released);
    CleanupError::check(std::mem::take(&mut self.failures))
  }
}

/// The output slot once resolved.
struct ProducedOutput<'a> {
  reference: &'a ArtifactReference,
  scratch: PathBuf,
  path: PathBuf,
}

impl Pipeline {
  /// Resolve, run and clean up one registration.
  ///
  /// A failure during resolution or execution is the primary error; cleanup
  /// failures are only reported on their own when everything else succeeded.
  #[instrument(name = "task", skip_all, fields(task = %registration.name()))]
  pub(crate) async fn execute_registration(
    &self,
    registration: &TaskRegistration,
    execution_id: &str,
    retained: &mut ResourceScope,
  ) -> Result<TaskStatus, PipelineError> {
    let name = registration.name();
    info!("task_started");
    self.notifier.notify(ExecutionEvent::TaskStarted {
      execution_id: execution_id.to_string(),
      task: name.clone(),
    });

    let mut invocation = Invocation::new(self.scope());
    let result = self
      .invoke(registration, &name, execution_id, &mut invocation, retained)
      .await;
    let released = invocation.release();

    let result = match (result, released) {
      (Ok(status), Ok(())) => Ok(status),
      (Ok(_), Err(source)) => Err(PipelineError::Cleanup {
        task: name.clone(),
        source,
      }),
      (Err(e), Ok(())) => Err(e),
      (Err(e), Err(secondary)) => {
        warn!(error = %secondary, "cleanup_failed_after_error");
        Err(e)
      }
    };

    match &result {
      Ok(TaskStatus::Skipped) => {}
      Ok(TaskStatus::Executed) => {
        info!("task_completed");
        self.notifier.notify(ExecutionEvent::TaskCompleted {
          execution_id: execution_id.to_string(),
          task: name,
        });
      }
      Err(e) => {
        warn!(error = %e, "task_failed");
        self.notifier.notify(ExecutionEvent::TaskFailed {
          execution_id: execution_id.to_string(),
          task: name,
          error: e.to_string(),
        });
      }
    }

    result
  }

  async fn invoke(
    &self,
    registration: &TaskRegistration,
    name: &str,
    execution_id: &str,
    invocation: &mut Invocation,
    retained: &mut ResourceScope,
  ) -> Result<TaskStatus, PipelineError> {
    let task = registration.task();

    let input = match registration.input() {
      None => None,
      Some(binding) => Some(self.resolve_binding(name, binding, invocation).await?),
    };

    let mut produced = None;
    let output = match registration.output() {
      None => None,
      Some(Binding::File(path)) => Some(path.clone()),
      Some(Binding::Artifact(reference)) => {
        self.manager(name, reference)?;
        let scratch = invocation.scope.allocate_directory().await.map_err(|e| {
          PipelineError::from_task(
            name,
            TaskError::caused_by("failed to allocate output directory", e),
          )
        })?;
        let path = scratch.join(OUTPUT);
        produced = Some(ProducedOutput {
          reference,
          scratch,
          path: path.clone(),
        });
        Some(path)
      }
    };

    if let Some(output) = &produced
      && !registration.is_forced()
      && let Some(existing) = self.existing_artifact(name, output.reference).await?
      && task.is_valid_artifact(&existing).await
    {
      info!(artifact = %output.reference, "task_skipped");
      self.notifier.notify(ExecutionEvent::TaskSkipped {
        execution_id: execution_id.to_string(),
        task: name.to_string(),
        artifact: output.reference.to_string(),
      });
      return Ok(TaskStatus::Skipped);
    }

    let mut builder = Context::builder(name).resources(self.scope());
    if let Some(input) = input {
      builder = builder.input(input);
    }
    if let Some(output) = output {
      builder = builder.output(output);
    }
    for (parameter, binding) in registration.parameters() {
      let path = self.resolve_binding(name, binding, invocation).await?;
      builder = builder.parameter(parameter.clone(), path);
    }
    if let Some(manager) = &self.manager {
      builder = builder.artifact_manager(manager.clone());
    }

    let mut context = builder.build();
    let outcome = task.execute(&mut context).await;
    let closed = context.close();
    invocation.absorb(closed);
    outcome.map_err(|e| PipelineError::from_task(name, e))?;

    if let Some(output) = produced {
      self.persist(name, output, invocation, retained).await?;
    }

    Ok(TaskStatus::Executed)
  }

  fn manager(
    &self,
    name: &str,
    reference: &ArtifactReference,
  ) -> Result<&Arc<ArtifactManager>, PipelineError> {
    self
      .manager
      .as_ref()
      .ok_or_else(|| PipelineError::missing_manager(name, reference))
  }

  /// Resolve an input or parameter binding to a path.
  async fn resolve_binding(
    &self,
    name: &str,
    binding: &Binding,
    invocation: &mut Invocation,
  ) -> Result<PathBuf, PipelineError> {
    let reference = match binding {
      Binding::File(path) => return Ok(path.clone()),
      Binding::Artifact(reference) => reference,
    };

    let manager = self.manager(name, reference)?;
    let artifact = manager
      .get_artifact(reference)
      .await
      .map_err(|e| PipelineError::Dependency {
        task: name.to_string(),
        message: format!("failed to read artifact {}", reference),
        source: Some(e),
      })?
      .ok_or_else(|| {
        PipelineError::dependency(name, format!("artifact {} is not available", reference))
      })?;

    debug!(artifact = %reference, path = %artifact.path().display(), "artifact_resolved");
    let path = artifact.path().to_path_buf();
    invocation.opened.push(artifact);
    Ok(path)
  }

  /// Look up a previously produced output. Lookup failures only cost a
  /// rebuild.
  async fn existing_artifact(
    &self,
    name: &str,
    reference: &ArtifactReference,
  ) -> Result<Option<Arc<Artifact>>, PipelineError> {
    let manager = self.manager(name, reference)?;
    match manager.get_artifact(reference).await {
      Ok(found) => Ok(found),
      Err(e) => {
        warn!(artifact = %reference, error = %e, "artifact_lookup_failed");
        Ok(None)
      }
    }
  }

  /// Register a freshly produced output with the artifact manager.
  async fn persist(
    &self,
    name: &str,
    output: ProducedOutput<'_>,
    invocation: &mut Invocation,
    retained: &mut ResourceScope,
  ) -> Result<(), PipelineError> {
    let manager = self.manager(name, output.reference)?;

    if !exists(&output.path).await {
      return Err(PipelineError::from_task(
        name,
        TaskError::execution(format!(
          "task completed without writing its output {}",
          output.path.display()
        )),
      ));
    }

    let artifact = manager
      .register_artifact(output.reference, &output.path)
      .await
      .map_err(|e| {
        PipelineError::from_task(
          name,
          TaskError::caused_by(format!("failed to register artifact {}", output.reference), e),
        )
      })?;

    if artifact.is_transient() {
      invocation.scope.forget(&output.scratch);
      retained.adopt_directory(output.scratch);
    }
    Ok(())
  }
}

async fn exists(path: &Path) -> bool {
  tokio::fs::try_exists(path).await.unwrap_or(false)
}
