//! End-to-end tests for pipeline execution.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kiln_artifact::{
  Artifact, ArtifactError, ArtifactLocation, ArtifactManager, ArtifactReference, Cache,
  LocalFileCache,
};
use kiln_pipeline::{
  ChannelNotifier, ExecutionEvent, Pipeline, PipelineError, TaskRegistration, TaskStatus,
};
use kiln_task::{Context, Task, TaskError, TaskKind};

#[derive(Clone)]
enum Behaviour {
  /// Write the given content to the output path.
  Write(&'static str),
  /// Append the input file's content to the output path.
  Transform(&'static str),
  /// Allocate temporaries, then fail.
  AllocateThenFail,
  /// Do nothing at all.
  Idle,
  /// Ask the context for an input that was never bound.
  NeedInput,
  /// Leave a file in a read-only temporary directory, then fail or not.
  #[cfg(unix)]
  Lock { fail: bool },
}

/// Task double recording what the engine asked of it.
#[derive(Clone)]
struct Recorder {
  kind: &'static str,
  behaviour: Behaviour,
  valid: bool,
  required_artifacts: BTreeSet<ArtifactReference>,
  parameters: BTreeSet<String>,
  runs: Arc<AtomicUsize>,
  validity_checks: Arc<AtomicUsize>,
  inputs: Arc<Mutex<Vec<PathBuf>>>,
  allocated: Arc<Mutex<Vec<PathBuf>>>,
  parameter_paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl Recorder {
  fn new(kind: &'static str, behaviour: Behaviour) -> Self {
    Self {
      kind,
      behaviour,
      valid: true,
      required_artifacts: BTreeSet::new(),
      parameters: BTreeSet::new(),
      runs: Arc::new(AtomicUsize::new(0)),
      validity_checks: Arc::new(AtomicUsize::new(0)),
      inputs: Arc::new(Mutex::new(Vec::new())),
      allocated: Arc::new(Mutex::new(Vec::new())),
      parameter_paths: Arc::new(Mutex::new(Vec::new())),
    }
  }

  fn invalid(mut self) -> Self {
    self.valid = false;
    self
  }

  fn requiring(mut self, reference: ArtifactReference) -> Self {
    self.required_artifacts.insert(reference);
    self
  }

  fn with_parameter(mut self, name: &str) -> Self {
    self.parameters.insert(name.to_string());
    self
  }

  fn runs(&self) -> usize {
    self.runs.load(Ordering::SeqCst)
  }

  fn validity_checks(&self) -> usize {
    self.validity_checks.load(Ordering::SeqCst)
  }

  fn last_input(&self) -> Option<PathBuf> {
    self.inputs.lock().expect("lock").last().cloned()
  }
}

#[async_trait]
impl Task for Recorder {
  fn kind(&self) -> TaskKind {
    TaskKind::from_static(self.kind)
  }

  fn required_artifacts(&self) -> BTreeSet<ArtifactReference> {
    self.required_artifacts.clone()
  }

  fn available_parameters(&self) -> BTreeSet<String> {
    self.parameters.clone()
  }

  async fn is_valid_artifact(&self, _artifact: &Artifact) -> bool {
    self.validity_checks.fetch_add(1, Ordering::SeqCst);
    self.valid
  }

  async fn execute(&self, context: &mut Context) -> Result<(), TaskError> {
    self.runs.fetch_add(1, Ordering::SeqCst);
    if let Some(input) = context.input_path() {
      self.inputs.lock().expect("lock").push(input.to_path_buf());
    }
    for name in &self.parameters {
      let path = context.required_parameter_path(name)?;
      self
        .parameter_paths
        .lock()
        .expect("lock")
        .push(path.to_path_buf());
    }

    match &self.behaviour {
      Behaviour::Write(content) => {
        let output = context.required_output_path()?;
        std::fs::write(output, content).map_err(|e| TaskError::caused_by("write failed", e))
      }
      Behaviour::Transform(suffix) => {
        let input = context.required_input_path()?;
        let output = context.required_output_path()?;
        let content =
          std::fs::read_to_string(input).map_err(|e| TaskError::caused_by("read failed", e))?;
        std::fs::write(output, format!("{}{}", content, suffix))
          .map_err(|e| TaskError::caused_by("write failed", e))
      }
      Behaviour::AllocateThenFail => {
        let directory = context.allocate_temporary_directory().await?;
        let file = context.allocate_temporary_file().await?;
        std::fs::write(directory.join("partial.txt"), "partial")
          .map_err(|e| TaskError::caused_by("write failed", e))?;
        self.allocated.lock().expect("lock").extend([directory, file]);
        Err(TaskError::execution("deliberate failure"))
      }
      Behaviour::Idle => Ok(()),
      Behaviour::NeedInput => context.required_input_path().map(|_| ()),
      #[cfg(unix)]
      Behaviour::Lock { fail } => {
        use std::os::unix::fs::PermissionsExt;

        let directory = context.allocate_temporary_directory().await?;
        std::fs::write(directory.join("held.txt"), "held")
          .map_err(|e| TaskError::caused_by("write failed", e))?;
        std::fs::set_permissions(&directory, std::fs::Permissions::from_mode(0o555))
          .map_err(|e| TaskError::caused_by("chmod failed", e))?;
        self.allocated.lock().expect("lock").push(directory);
        if *fail {
          Err(TaskError::execution("deliberate failure"))
        } else {
          Ok(())
        }
      }
    }
  }
}

fn reference(name: &str) -> ArtifactReference {
  ArtifactReference::new(name, "1.0", "txt")
}

fn is_empty_dir(path: &Path) -> bool {
  std::fs::read_dir(path)
    .map(|mut entries| entries.next().is_none())
    .unwrap_or(true)
}

/// Cache whose writes always fail.
struct RejectingCache;

#[async_trait]
impl Cache for RejectingCache {
  async fn lookup(
    &self,
    _reference: &ArtifactReference,
  ) -> Result<Option<ArtifactLocation>, ArtifactError> {
    Ok(None)
  }

  async fn write(
    &self,
    _reference: &ArtifactReference,
    source: &Path,
  ) -> Result<ArtifactLocation, ArtifactError> {
    Err(ArtifactError::io(source, std::io::Error::other("disk full")))
  }
}

/// Whether a read-only directory actually refuses writes for this user.
#[cfg(unix)]
fn permissions_enforced(base: &Path) -> bool {
  use std::os::unix::fs::PermissionsExt;

  let locked = base.join("locked");
  std::fs::create_dir_all(&locked).expect("failed to create dir");
  std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555))
    .expect("failed to lock dir");
  let enforced = std::fs::write(locked.join("attempt"), "").is_err();
  unlock(&[locked.clone()]);
  std::fs::remove_dir_all(&locked).expect("failed to remove dir");
  enforced
}

#[cfg(unix)]
fn unlock(directories: &[PathBuf]) {
  use std::os::unix::fs::PermissionsExt;

  for directory in directories {
    std::fs::set_permissions(directory, std::fs::Permissions::from_mode(0o755))
      .expect("failed to unlock dir");
  }
}

struct Fixture {
  root: tempfile::TempDir,
  cache: PathBuf,
  scratch: PathBuf,
}

impl Fixture {
  fn new() -> Self {
    let root = tempfile::tempdir().expect("failed to create tempdir");
    let cache = root.path().join("cache");
    let scratch = root.path().join("scratch");
    std::fs::create_dir_all(&scratch).expect("failed to create scratch");
    Self {
      root,
      cache,
      scratch,
    }
  }

  fn builder(&self) -> kiln_pipeline::PipelineBuilder {
    Pipeline::builder()
      .with_cache(LocalFileCache::new(&self.cache))
      .with_scratch_dir(&self.scratch)
  }

  async fn seed(&self, reference: &ArtifactReference, content: &str) -> PathBuf {
    let source = self.scratch.join("seed.txt");
    std::fs::write(&source, content).expect("failed to write seed");
    let location = LocalFileCache::new(&self.cache)
      .write(reference, &source)
      .await
      .expect("failed to seed cache");
    std::fs::remove_file(&source).expect("failed to remove seed");
    location.path().to_path_buf()
  }
}

#[tokio::test]
async fn producer_runs_before_consumer_and_output_is_cached() {
  let fixture = Fixture::new();
  let producer = Recorder::new("produce", Behaviour::Write("hello"));
  let consumer = Recorder::new("consume", Behaviour::Transform(" world"));
  let result = fixture.scratch.join("result.txt");

  let pipeline = fixture
    .builder()
    .with_task(
      TaskRegistration::new(consumer.clone())
        .with_input_artifact(reference("greeting"))
        .with_output_file(&result),
    )
    .expect("consumer registers")
    .with_task(TaskRegistration::new(producer.clone()).with_output_artifact(reference("greeting")))
    .expect("producer registers")
    .build()
    .expect("pipeline builds");

  let names: Vec<String> = pipeline.registrations().iter().map(|r| r.name()).collect();
  assert_eq!(names, ["produce", "consume"]);

  let report = pipeline.execute().await.expect("pipeline runs");

  assert_eq!(report.executed().collect::<Vec<_>>(), ["produce", "consume"]);
  assert_eq!(std::fs::read_to_string(&result).expect("result"), "hello world");

  let cached = LocalFileCache::new(&fixture.cache).entry_path(&reference("greeting"));
  assert_eq!(consumer.last_input(), Some(cached.clone()));
  assert_eq!(std::fs::read_to_string(cached).expect("cached"), "hello");
  std::fs::remove_file(&result).expect("remove result");
  assert!(is_empty_dir(&fixture.scratch));
}

#[tokio::test]
async fn missing_manager_fails_before_any_task_runs() {
  let first = Recorder::new("first", Behaviour::Idle);
  let producer = Recorder::new("produce", Behaviour::Write("data"));

  let pipeline = Pipeline::builder()
    .with_task(TaskRegistration::new(first.clone()))
    .expect("first registers")
    .with_task(TaskRegistration::new(producer.clone()).with_output_artifact(reference("x")))
    .expect("producer registers")
    .build()
    .expect("pipeline builds");

  let error = pipeline.execute().await.expect_err("should fail");

  assert!(error.is_dependency());
  assert_eq!(error.task(), Some("produce"));
  assert!(error.to_string().contains("without a configured artifact manager"));
  assert_eq!(first.runs(), 0);
  assert_eq!(producer.runs(), 0);
}

#[tokio::test]
async fn valid_cached_artifact_skips_task() {
  let fixture = Fixture::new();
  fixture.seed(&reference("valid"), "cached").await;
  fixture.seed(&reference("stale"), "cached").await;

  let fresh = Recorder::new("fresh", Behaviour::Write("new"));
  let stale = Recorder::new("stale", Behaviour::Write("new")).invalid();

  let pipeline = fixture
    .builder()
    .with_task(TaskRegistration::new(fresh.clone()).with_output_artifact(reference("valid")))
    .expect("registers")
    .with_task(TaskRegistration::new(stale.clone()).with_output_artifact(reference("stale")))
    .expect("registers")
    .build()
    .expect("pipeline builds");

  let report = pipeline.execute().await.expect("pipeline runs");

  assert_eq!(report.skipped().collect::<Vec<_>>(), ["fresh"]);
  assert_eq!(report.executed().collect::<Vec<_>>(), ["stale"]);
  assert_eq!(fresh.validity_checks(), 1);
  assert_eq!(stale.validity_checks(), 1);
  assert_eq!(fresh.runs(), 0);
  assert_eq!(stale.runs(), 1);

  let cache = LocalFileCache::new(&fixture.cache);
  let refreshed = std::fs::read_to_string(cache.entry_path(&reference("stale"))).expect("read");
  assert_eq!(refreshed, "new");
}

#[tokio::test]
async fn forced_execution_ignores_cached_artifact() {
  let fixture = Fixture::new();
  fixture.seed(&reference("x"), "cached").await;
  let task = Recorder::new("produce", Behaviour::Write("forced"));

  let pipeline = fixture
    .builder()
    .with_task(
      TaskRegistration::new(task.clone())
        .with_output_artifact(reference("x"))
        .with_forced_execution(true),
    )
    .expect("registers")
    .build()
    .expect("pipeline builds");

  let report = pipeline.execute().await.expect("pipeline runs");

  assert_eq!(report.outcomes[0].status, TaskStatus::Executed);
  assert_eq!(task.validity_checks(), 0);
  assert_eq!(task.runs(), 1);

  let fresh = ArtifactManager::new(LocalFileCache::new(&fixture.cache));
  let artifact = fresh
    .get_artifact(&reference("x"))
    .await
    .expect("lookup")
    .expect("artifact should be cached");
  assert!(!artifact.is_transient());
  assert_eq!(std::fs::read_to_string(artifact.path()).expect("read"), "forced");
}

#[tokio::test]
async fn second_run_skips_everything() {
  let fixture = Fixture::new();
  let task = Recorder::new("produce", Behaviour::Write("once"));

  let pipeline = fixture
    .builder()
    .with_task(TaskRegistration::new(task.clone()).with_output_artifact(reference("x")))
    .expect("registers")
    .build()
    .expect("pipeline builds");

  pipeline.execute().await.expect("first run");
  let report = pipeline.execute().await.expect("second run");

  assert_eq!(report.skipped().count(), 1);
  assert_eq!(task.runs(), 1);
}

#[tokio::test]
async fn cached_input_resolves_to_artifact_path() {
  let fixture = Fixture::new();
  let cached = fixture.seed(&reference("prebuilt"), "from cache").await;
  let consumer = Recorder::new("consume", Behaviour::Idle);

  let pipeline = fixture
    .builder()
    .with_task(TaskRegistration::new(consumer.clone()).with_input_artifact(reference("prebuilt")))
    .expect("registers")
    .build()
    .expect("pipeline builds");

  pipeline.execute().await.expect("pipeline runs");

  assert_eq!(consumer.last_input(), Some(cached));
}

#[tokio::test]
async fn missing_input_artifact_is_dependency_error() {
  let fixture = Fixture::new();
  let consumer = Recorder::new("consume", Behaviour::Idle);

  let pipeline = fixture
    .builder()
    .with_task(TaskRegistration::new(consumer.clone()).with_input_artifact(reference("absent")))
    .expect("registers")
    .build()
    .expect("pipeline builds");

  let error = pipeline.execute().await.expect_err("should fail");

  assert!(matches!(error, PipelineError::Dependency { .. }));
  assert!(error.to_string().contains("absent:1.0:txt"));
  assert_eq!(consumer.runs(), 0);
}

#[tokio::test]
async fn failure_aborts_run_and_releases_resources() {
  let fixture = Fixture::new();
  let failing = Recorder::new("fail", Behaviour::AllocateThenFail);
  let after = Recorder::new("after", Behaviour::Idle);

  let pipeline = fixture
    .builder()
    .with_task(TaskRegistration::new(failing.clone()).with_output_artifact(reference("x")))
    .expect("registers")
    .with_task(TaskRegistration::new(after.clone()))
    .expect("registers")
    .build()
    .expect("pipeline builds");

  let error = pipeline.execute().await.expect_err("should fail");

  assert!(error.is_execution());
  assert!(!error.is_parameter());
  assert_eq!(error.task(), Some("fail"));
  assert_eq!(after.runs(), 0);

  let allocated = failing.allocated.lock().expect("lock").clone();
  assert_eq!(allocated.len(), 2);
  assert!(allocated.iter().all(|path| !path.exists()));
  assert!(is_empty_dir(&fixture.scratch));
  assert!(
    LocalFileCache::new(&fixture.cache)
      .lookup(&reference("x"))
      .await
      .expect("lookup")
      .is_none()
  );
}

#[cfg(unix)]
#[tokio::test]
async fn cleanup_failure_stays_secondary_to_task_error() {
  let fixture = Fixture::new();
  if !permissions_enforced(fixture.root.path()) {
    return;
  }
  let failing = Recorder::new("fail", Behaviour::Lock { fail: true });

  let pipeline = fixture
    .builder()
    .with_task(TaskRegistration::new(failing.clone()))
    .expect("registers")
    .build()
    .expect("pipeline builds");

  let error = pipeline.execute().await.expect_err("should fail");
  let allocated = failing.allocated.lock().expect("lock").clone();
  unlock(&allocated);

  assert!(error.is_execution());
  assert!(!error.is_cleanup());
  assert_eq!(error.task(), Some("fail"));
  assert!(error.to_string().contains("deliberate failure"));
  assert!(allocated.iter().all(|path| path.join("held.txt").exists()));
}

#[cfg(unix)]
#[tokio::test]
async fn cleanup_failure_after_success_is_reported() {
  let fixture = Fixture::new();
  if !permissions_enforced(fixture.root.path()) {
    return;
  }
  let task = Recorder::new("leaky", Behaviour::Lock { fail: false });

  let pipeline = fixture
    .builder()
    .with_task(TaskRegistration::new(task.clone()))
    .expect("registers")
    .build()
    .expect("pipeline builds");

  let error = pipeline.execute().await.expect_err("should fail");
  unlock(&task.allocated.lock().expect("lock").clone());

  assert!(matches!(error, PipelineError::Cleanup { .. }));
  assert_eq!(error.task(), Some("leaky"));
  assert!(error.to_string().contains("held.txt"));
}

#[tokio::test]
async fn cache_write_failure_falls_back_to_transient_artifact() {
  let fixture = Fixture::new();
  let producer = Recorder::new("produce", Behaviour::Write("uncached"));
  let consumer = Recorder::new("consume", Behaviour::Transform("!"));
  let result = fixture.root.path().join("result.txt");

  let pipeline = Pipeline::builder()
    .with_cache(RejectingCache)
    .with_scratch_dir(&fixture.scratch)
    .with_task(TaskRegistration::new(producer.clone()).with_output_artifact(reference("x")))
    .expect("registers")
    .with_task(
      TaskRegistration::new(consumer.clone())
        .with_input_artifact(reference("x"))
        .with_output_file(&result),
    )
    .expect("registers")
    .build()
    .expect("pipeline builds");

  let report = pipeline.execute().await.expect("pipeline runs");

  assert_eq!(report.executed().collect::<Vec<_>>(), ["produce", "consume"]);
  assert_eq!(std::fs::read_to_string(&result).expect("result"), "uncached!");

  let input = consumer.last_input().expect("consumer saw input");
  assert!(input.starts_with(&fixture.scratch));
  assert!(!input.exists());
  assert!(is_empty_dir(&fixture.scratch));
}

#[tokio::test]
async fn context_parameter_failure_is_parameter_error() {
  let task = Recorder::new("needs-input", Behaviour::NeedInput);

  let pipeline = Pipeline::builder()
    .with_task(TaskRegistration::new(task))
    .expect("registers")
    .build()
    .expect("pipeline builds");

  let error = pipeline.execute().await.expect_err("should fail");

  assert!(error.is_parameter());
  assert!(error.is_execution());
}

#[tokio::test]
async fn output_never_written_is_execution_error() {
  let fixture = Fixture::new();
  let task = Recorder::new("lazy", Behaviour::Idle);

  let pipeline = fixture
    .builder()
    .with_task(TaskRegistration::new(task).with_output_artifact(reference("x")))
    .expect("registers")
    .build()
    .expect("pipeline builds");

  let error = pipeline.execute().await.expect_err("should fail");

  assert!(matches!(error, PipelineError::Execution { .. }));
  assert!(is_empty_dir(&fixture.scratch));
}

#[tokio::test]
async fn transient_outputs_survive_until_the_run_ends() {
  let fixture = Fixture::new();
  let producer = Recorder::new("produce", Behaviour::Write("transient"));
  let consumer = Recorder::new("consume", Behaviour::Transform("!"));
  let result = fixture.root.path().join("result.txt");

  let pipeline = Pipeline::builder()
    .with_artifact_manager(Arc::new(ArtifactManager::without_cache()))
    .with_scratch_dir(&fixture.scratch)
    .with_task(TaskRegistration::new(producer).with_output_artifact(reference("x")))
    .expect("registers")
    .with_task(
      TaskRegistration::new(consumer.clone())
        .with_input_artifact(reference("x"))
        .with_output_file(&result),
    )
    .expect("registers")
    .build()
    .expect("pipeline builds");

  pipeline.execute().await.expect("pipeline runs");

  let input = consumer.last_input().expect("consumer saw input");
  assert!(input.starts_with(&fixture.scratch));
  assert_eq!(std::fs::read_to_string(&result).expect("result"), "transient!");
  assert!(!input.exists());
  assert!(is_empty_dir(&fixture.scratch));
}

#[tokio::test]
async fn artifact_parameters_are_resolved() {
  let fixture = Fixture::new();
  let schema = fixture.seed(&reference("schema"), "{}").await;
  let task = Recorder::new("validate", Behaviour::Idle).with_parameter("schema");

  let pipeline = fixture
    .builder()
    .with_task(TaskRegistration::new(task.clone()).with_parameter_artifact("schema", reference("schema")))
    .expect("registers")
    .build()
    .expect("pipeline builds");

  pipeline.execute().await.expect("pipeline runs");

  assert_eq!(*task.parameter_paths.lock().expect("lock"), vec![schema]);
}

#[tokio::test]
async fn registration_rejects_missing_required_parameter() {
  let task = Recorder::new("validate", Behaviour::Idle).with_parameter("schema");

  let error = Pipeline::builder()
    .with_task(TaskRegistration::new(task))
    .expect_err("should reject");

  assert!(error.is_parameter());
  assert!(error.to_string().contains("schema"));
}

#[tokio::test]
async fn unproduced_required_artifact_fails_validation() {
  let task = Recorder::new("package", Behaviour::Idle).requiring(reference("binary"));

  let error = Pipeline::builder()
    .with_task(TaskRegistration::new(task))
    .expect("registers")
    .build()
    .expect_err("should fail validation");

  assert!(matches!(error, PipelineError::Schedule(_)));
  assert!(error.is_dependency());
  assert!(error.to_string().contains("binary:1.0:txt"));
}

#[tokio::test]
async fn events_follow_execution() {
  let fixture = Fixture::new();
  fixture.seed(&reference("x"), "cached").await;
  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

  let pipeline = fixture
    .builder()
    .with_notifier(ChannelNotifier::new(tx))
    .with_task(
      TaskRegistration::new(Recorder::new("cached", Behaviour::Write("x")))
        .with_output_artifact(reference("x")),
    )
    .expect("registers")
    .with_task(TaskRegistration::new(Recorder::new("plain", Behaviour::Idle)))
    .expect("registers")
    .build()
    .expect("pipeline builds");

  let report = pipeline.execute().await.expect("pipeline runs");
  drop(pipeline);

  let mut events = Vec::new();
  while let Some(event) = rx.recv().await {
    events.push(event);
  }

  let id = report.execution_id;
  assert_eq!(
    events,
    vec![
      ExecutionEvent::PipelineStarted {
        execution_id: id.clone(),
        tasks: vec!["cached".to_string(), "plain".to_string()],
      },
      ExecutionEvent::TaskStarted {
        execution_id: id.clone(),
        task: "cached".to_string(),
      },
      ExecutionEvent::TaskSkipped {
        execution_id: id.clone(),
        task: "cached".to_string(),
        artifact: "x:1.0:txt".to_string(),
      },
      ExecutionEvent::TaskStarted {
        execution_id: id.clone(),
        task: "plain".to_string(),
      },
      ExecutionEvent::TaskCompleted {
        execution_id: id.clone(),
        task: "plain".to_string(),
      },
      ExecutionEvent::PipelineCompleted { execution_id: id },
    ]
  );
}
