use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use kiln_config::TaskDef;
use kiln_resolver::{ResolveError, TaskFactory};
use kiln_task::{Context, Task, TaskError, TaskKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fs::ensure_parent;
use crate::options;

const KIND: TaskKind = TaskKind::from_static("create-archive");

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateArchiveOptions {
  /// Name of the top-level entry. Defaults to the input's file name.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub root: Option<String>,
}

/// Writes a gzip-compressed tarball of its input.
#[derive(Debug, Clone, Default)]
pub struct CreateArchiveTask {
  root: Option<String>,
}

impl CreateArchiveTask {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_root(mut self, root: impl Into<String>) -> Self {
    self.root = Some(root.into());
    self
  }

  fn entry_name(&self, input: &Path) -> PathBuf {
    match (&self.root, input.file_name()) {
      (Some(root), _) => PathBuf::from(root),
      (None, Some(name)) => PathBuf::from(name),
      (None, None) => PathBuf::from("content"),
    }
  }
}

#[async_trait]
impl Task for CreateArchiveTask {
  fn kind(&self) -> TaskKind {
    KIND
  }

  fn requires_input(&self) -> bool {
    true
  }

  fn requires_output(&self) -> bool {
    true
  }

  async fn execute(&self, context: &mut Context) -> Result<(), TaskError> {
    let input = context.required_input_path()?.to_path_buf();
    let output = context.required_output_path()?.to_path_buf();
    let name = self.entry_name(&input);

    ensure_parent(&output)
      .await
      .map_err(|e| TaskError::caused_by(format!("cannot create {}", output.display()), e))?;

    let target = output.clone();
    let source = input.clone();
    tokio::task::spawn_blocking(move || pack(&source, &name, &target))
      .await
      .map_err(|e| TaskError::caused_by("archive task panicked", e))?
      .map_err(|e| {
        TaskError::caused_by(
          format!("failed to archive {} to {}", input.display(), output.display()),
          e,
        )
      })?;

    debug!(input = %input.display(), output = %output.display(), "archive_created");
    Ok(())
  }
}

fn pack(source: &Path, name: &Path, target: &Path) -> std::io::Result<()> {
  let file = File::create(target)?;
  let encoder = GzEncoder::new(file, Compression::default());
  let mut builder = tar::Builder::new(encoder);

  if source.is_dir() {
    builder.append_dir_all(name, source)?;
  } else {
    builder.append_path_with_name(source, name)?;
  }

  builder.into_inner()?.finish()?;
  Ok(())
}

pub struct CreateArchiveFactory;

impl TaskFactory for CreateArchiveFactory {
  fn kind(&self) -> TaskKind {
    KIND
  }

  fn description(&self) -> &str {
    "Write a .tar.gz of the input file or directory"
  }

  fn create(&self, def: &TaskDef) -> Result<Arc<dyn Task>, ResolveError> {
    let options: CreateArchiveOptions = options::parse(def)?;
    let mut task = CreateArchiveTask::new();
    if let Some(root) = options.root {
      task = task.with_root(root);
    }
    Ok(Arc::new(task))
  }
}
