use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kiln_artifact::{
  ArchiveCache, ArtifactManager, ArtifactReference, Cache, LocalFileCache, RepositoryCache,
  TemporaryFileCache,
};
use kiln_config::{BindingDef, CacheDef, PipelineDef, TaskDef};
use kiln_pipeline::{Pipeline, TaskRegistration};
use kiln_task::TaskKind;
use tracing::debug;

use crate::declared::DeclaredTask;
use crate::error::ResolveError;
use crate::registry::TaskRegistry;

/// Resolver transforms a PipelineDef into a validated Pipeline.
#[async_trait]
pub trait Resolver: Send + Sync {
  /// Resolve a pipeline definition.
  ///
  /// This process:
  /// 1. Builds the cache backend and artifact manager
  /// 2. Creates each task through its kind's factory
  /// 3. Registers the tasks, then validates and orders them
  async fn resolve(&self, def: PipelineDef) -> Result<Pipeline, ResolveError>;
}

/// Standard resolver backed by a task registry.
pub struct StandardResolver {
  registry: TaskRegistry,
  base_dir: PathBuf,
  scratch_dir: Option<PathBuf>,
  force: bool,
}

impl StandardResolver {
  pub fn new(registry: TaskRegistry) -> Self {
    Self {
      registry,
      base_dir: PathBuf::from("."),
      scratch_dir: None,
      force: false,
    }
  }

  /// Directory relative paths in the definition are resolved against.
  pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.base_dir = dir.into();
    self
  }

  pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.scratch_dir = Some(dir.into());
    self
  }

  /// Force every registration to run.
  pub fn with_force(mut self, force: bool) -> Self {
    self.force = force;
    self
  }

  pub fn registry(&self) -> &TaskRegistry {
    &self.registry
  }

  fn path(&self, path: &Path) -> PathBuf {
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.base_dir.join(path)
    }
  }

  fn cache(&self, def: Option<&CacheDef>) -> Result<ArtifactManager, ResolveError> {
    let cache: Box<dyn Cache> = match def {
      None => return Ok(ArtifactManager::without_cache()),
      Some(CacheDef::Local { path }) => Box::new(LocalFileCache::new(self.path(path))),
      Some(CacheDef::Repository { path }) => Box::new(RepositoryCache::new(self.path(path))),
      Some(CacheDef::Archive { path }) => Box::new(ArchiveCache::new(self.path(path))),
      Some(CacheDef::Temporary) => Box::new(TemporaryFileCache::new().map_err(ResolveError::Cache)?),
    };
    Ok(ArtifactManager::from_boxed(Some(cache)))
  }

  fn registration(&self, index: usize, def: &TaskDef) -> Result<TaskRegistration, ResolveError> {
    let factory = self
      .registry
      .get(&def.task)
      .ok_or_else(|| ResolveError::UnknownTask {
        index,
        kind: def.task.clone(),
      })?;

    let name = def.display_name();
    let task = factory.create(def)?;

    let references = |values: &[String]| -> Result<Vec<ArtifactReference>, ResolveError> {
      values.iter().map(|value| parse_reference(name, value)).collect()
    };

    let mut declared = DeclaredTask::new(task)
      .requiring(def.requires.iter().cloned().map(TaskKind::new))
      .after(def.after.iter().cloned().map(TaskKind::new))
      .requiring_artifacts(references(&def.requires_artifacts)?)
      .creating(references(&def.creates)?);
    if let Some(name) = &def.name {
      declared = declared.named(name.clone());
    }

    let mut registration =
      TaskRegistration::new(declared).with_forced_execution(def.force || self.force);

    registration = match &def.input {
      None => registration,
      Some(BindingDef::Path(path)) => registration.with_input_file(self.path(path)),
      Some(BindingDef::Artifact(value)) => {
        registration.with_input_artifact(parse_reference(name, value)?)
      }
    };

    registration = match &def.output {
      None => registration,
      Some(BindingDef::Path(path)) => registration.with_output_file(self.path(path)),
      Some(BindingDef::Artifact(value)) => {
        registration.with_output_artifact(parse_reference(name, value)?)
      }
    };

    for (parameter, binding) in &def.parameters {
      registration = match binding {
        BindingDef::Path(path) => registration.with_parameter_file(parameter, self.path(path)),
        BindingDef::Artifact(value) => {
          registration.with_parameter_artifact(parameter, parse_reference(name, value)?)
        }
      };
    }

    Ok(registration)
  }
}

fn parse_reference(task: &str, value: &str) -> Result<ArtifactReference, ResolveError> {
  value
    .parse()
    .map_err(|source| ResolveError::InvalidReference {
      task: task.to_string(),
      source,
    })
}

#[async_trait]
impl Resolver for StandardResolver {
  async fn resolve(&self, def: PipelineDef) -> Result<Pipeline, ResolveError> {
    let manager = self.cache(def.cache.as_ref())?;

    let mut builder = Pipeline::builder().with_artifact_manager(Arc::new(manager));
    if let Some(dir) = &self.scratch_dir {
      builder = builder.with_scratch_dir(dir);
    }

    for (index, task) in def.tasks.iter().enumerate() {
      builder = builder.with_task(self.registration(index, task)?)?;
    }

    let pipeline = builder.build()?;
    debug!(
      pipeline = %def.name,
      tasks = pipeline.registrations().len(),
      "pipeline_resolved"
    );
    Ok(pipeline)
  }
}
