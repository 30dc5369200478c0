use std::path::PathBuf;
use std::sync::Arc;

use kiln_artifact::{ArtifactManager, Cache};
use kiln_scheduler::Scheduler;
use kiln_task::ResourceScope;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::PipelineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::registration::TaskRegistration;

/// What happened to one registration during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Executed,
  Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
  pub task: String,
  pub status: TaskStatus,
}

/// Result of a complete pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
  pub execution_id: String,
  pub outcomes: Vec<TaskOutcome>,
}

impl ExecutionReport {
  pub fn executed(&self) -> impl Iterator<Item = &str> {
    self.with_status(TaskStatus::Executed)
  }

  pub fn skipped(&self) -> impl Iterator<Item = &str> {
    self.with_status(TaskStatus::Skipped)
  }

  fn with_status(&self, status: TaskStatus) -> impl Iterator<Item = &str> {
    self
      .outcomes
      .iter()
      .filter(move |outcome| outcome.status == status)
      .map(|outcome| outcome.task.as_str())
  }
}

/// Collects registrations and pipeline-wide settings.
pub struct PipelineBuilder {
  manager: Option<Arc<ArtifactManager>>,
  notifier: Arc<dyn ExecutionNotifier>,
  scratch: Option<PathBuf>,
  registrations: Vec<TaskRegistration>,
}

impl PipelineBuilder {
  fn new() -> Self {
    Self {
      manager: None,
      notifier: Arc::new(NoopNotifier),
      scratch: None,
      registrations: Vec::new(),
    }
  }

  /// Use an artifact manager backed by `cache`.
  pub fn with_cache(self, cache: impl Cache + 'static) -> Self {
    self.with_artifact_manager(Arc::new(ArtifactManager::new(cache)))
  }

  pub fn with_artifact_manager(mut self, manager: Arc<ArtifactManager>) -> Self {
    self.manager = Some(manager);
    self
  }

  pub fn with_notifier(mut self, notifier: impl ExecutionNotifier + 'static) -> Self {
    self.notifier = Arc::new(notifier);
    self
  }

  /// Allocate temporary output and task directories under `dir` instead of
  /// the system temporary directory.
  pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.scratch = Some(dir.into());
    self
  }

  /// Add a registration, rejecting it immediately if its bindings do not
  /// satisfy the task.
  pub fn with_task(mut self, registration: TaskRegistration) -> Result<Self, PipelineError> {
    registration.check()?;
    self.registrations.push(registration);
    Ok(self)
  }

  /// Validate every declaration and fix the execution order.
  pub fn build(self) -> Result<Pipeline, PipelineError> {
    let nodes: Vec<_> = self.registrations.iter().map(|r| r.node()).collect();
    let order = Scheduler::plan(&nodes)?;

    let mut slots: Vec<Option<TaskRegistration>> =
      self.registrations.into_iter().map(Some).collect();
    let registrations = order
      .into_iter()
      .filter_map(|index| slots[index].take())
      .collect();

    Ok(Pipeline {
      manager: self.manager,
      notifier: self.notifier,
      scratch: self.scratch,
      registrations,
    })
  }
}

/// A validated, ordered set of task registrations.
pub struct Pipeline {
  pub(crate) manager: Option<Arc<ArtifactManager>>,
  pub(crate) notifier: Arc<dyn ExecutionNotifier>,
  pub(crate) scratch: Option<PathBuf>,
  registrations: Vec<TaskRegistration>,
}

impl Pipeline {
  pub fn builder() -> PipelineBuilder {
    PipelineBuilder::new()
  }

  /// Registrations in execution order.
  pub fn registrations(&self) -> &[TaskRegistration] {
    &self.registrations
  }

  pub fn artifact_manager(&self) -> Option<&Arc<ArtifactManager>> {
    self.manager.as_ref()
  }

  pub(crate) fn scope(&self) -> ResourceScope {
    match &self.scratch {
      Some(dir) => ResourceScope::in_dir(dir),
      None => ResourceScope::new(),
    }
  }

  /// Run every registration in order, stopping at the first failure.
  #[instrument(name = "pipeline", skip(self), fields(execution_id = tracing::field::Empty))]
  pub async fn execute(&self) -> Result<ExecutionReport, PipelineError> {
    let execution_id = uuid::Uuid::new_v4().to_string();
    tracing::Span::current().record("execution_id", execution_id.as_str());

    self.notifier.notify(ExecutionEvent::PipelineStarted {
      execution_id: execution_id.clone(),
      tasks: self.registrations.iter().map(|r| r.name()).collect(),
    });
    info!(tasks = self.registrations.len(), "pipeline_started");

    // Outputs recorded at temporary paths must outlive the task that wrote
    // them, so they are owned by the run rather than the invocation.
    let mut retained = self.scope();
    let result = self.run(&execution_id, &mut retained).await;
    let released = self.release(&mut retained);

    let result = match (result, released) {
      (Ok(outcomes), Ok(())) => Ok(ExecutionReport {
        execution_id: execution_id.clone(),
        outcomes,
      }),
      (Ok(_), Err(e)) => Err(e),
      (Err(e), Ok(())) => Err(e),
      (Err(e), Err(secondary)) => {
        warn!(error = %secondary, "release_failed_after_error");
        Err(e)
      }
    };

    match &result {
      Ok(_) => {
        info!("pipeline_completed");
        self.notifier.notify(ExecutionEvent::PipelineCompleted {
          execution_id: execution_id.clone(),
        });
      }
      Err(e) => {
        warn!(error = %e, "pipeline_failed");
        self.notifier.notify(ExecutionEvent::PipelineFailed {
          execution_id: execution_id.clone(),
          error: e.to_string(),
        });
      }
    }

    result
  }

  async fn run(
    &self,
    execution_id: &str,
    retained: &mut ResourceScope,
  ) -> Result<Vec<TaskOutcome>, PipelineError> {
    self.preflight()?;

    let mut outcomes = Vec::with_capacity(self.registrations.len());
    for registration in &self.registrations {
      let status = self
        .execute_registration(registration, execution_id, retained)
        .await?;
      outcomes.push(TaskOutcome {
        task: registration.name(),
        status,
      });
    }
    Ok(outcomes)
  }

  /// Reject artifact bindings that can never resolve before any task runs.
  fn preflight(&self) -> Result<(), PipelineError> {
    if self.manager.is_some() {
      return Ok(());
    }

    for registration in &self.registrations {
      if let Some(reference) = registration.bound_artifacts().next() {
        return Err(PipelineError::missing_manager(
          &registration.name(),
          reference,
        ));
      }
    }
    Ok(())
  }

  fn release(&self, retained: &mut ResourceScope) -> Result<(), PipelineError> {
    let artifacts = match &self.manager {
      Some(manager) => manager.release_all(),
      None => Ok(()),
    };
    let scratch = retained.release();

    match (artifacts, scratch) {
      (Ok(()), Ok(())) => Ok(()),
      (Err(source), Ok(())) | (Ok(()), Err(source)) => Err(PipelineError::Release { source }),
      (Err(source), Err(secondary)) => {
        warn!(error = %secondary, "scratch_release_failed");
        Err(PipelineError::Release { source })
      }
    }
  }
}

impl std::fmt::Debug for PipelineBuilder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PipelineBuilder")
      .field("manager", &self.manager)
      .field("registrations", &self.registrations)
      .finish_non_exhaustive()
  }
}

impl std::fmt::Debug for Pipeline {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Pipeline")
      .field("manager", &self.manager)
      .field("registrations", &self.registrations)
      .finish_non_exhaustive()
  }
}
