use std::sync::Arc;

use async_trait::async_trait;
use kiln_artifact::copy_dir_recursive;
use kiln_config::TaskDef;
use kiln_resolver::{ResolveError, TaskFactory};
use kiln_task::{Context, Task, TaskError, TaskKind};
use tracing::debug;

use crate::fs::ensure_parent;

const KIND: TaskKind = TaskKind::from_static("copy");

/// Copies its input file or directory to its output.
#[derive(Debug, Default)]
pub struct CopyTask;

#[async_trait]
impl Task for CopyTask {
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
    let input = context.required_input_path()?;
    let output = context.required_output_path()?;

    let metadata = tokio::fs::metadata(input)
      .await
      .map_err(|e| TaskError::caused_by(format!("cannot read {}", input.display()), e))?;

    let copied = if metadata.is_dir() {
      copy_dir_recursive(input, output).await
    } else {
      match ensure_parent(output).await {
        Ok(()) => tokio::fs::copy(input, output).await.map(|_| ()),
        Err(e) => Err(e),
      }
    };
    copied.map_err(|e| {
      TaskError::caused_by(
        format!("failed to copy {} to {}", input.display(), output.display()),
        e,
      )
    })?;

    debug!(from = %input.display(), to = %output.display(), "copied");
    Ok(())
  }
}

pub struct CopyFactory;

impl TaskFactory for CopyFactory {
  fn kind(&self) -> TaskKind {
    KIND
  }

  fn description(&self) -> &str {
    "Copy the input file or directory to the output"
  }

  fn create(&self, _def: &TaskDef) -> Result<Arc<dyn Task>, ResolveError> {
    Ok(Arc::new(CopyTask))
  }
}
