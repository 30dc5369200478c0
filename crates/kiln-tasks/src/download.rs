use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_config::TaskDef;
use kiln_resolver::{ResolveError, TaskFactory};
use kiln_task::{Context, Task, TaskError, TaskKind};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::fs::ensure_parent;
use crate::options;

const KIND: TaskKind = TaskKind::from_static("download");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
  pub url: String,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub headers: BTreeMap<String, String>,
}

/// Fetches a URL into its output path.
#[derive(Debug, Clone)]
pub struct DownloadFileTask {
  options: DownloadOptions,
  client: Client,
}

impl DownloadFileTask {
  pub fn new(options: DownloadOptions) -> Self {
    Self {
      options,
      client: Client::new(),
    }
  }

  /// Use a preconfigured client, e.g. one with proxies or timeouts set.
  pub fn with_client(mut self, client: Client) -> Self {
    self.client = client;
    self
  }

  pub fn url(&self) -> &str {
    &self.options.url
  }
}

#[async_trait]
impl Task for DownloadFileTask {
  fn kind(&self) -> TaskKind {
    KIND
  }

  fn requires_output(&self) -> bool {
    true
  }

  async fn execute(&self, context: &mut Context) -> Result<(), TaskError> {
    let output = context.required_output_path()?;
    let url = &self.options.url;

    let mut request = self.client.get(url);
    for (key, value) in &self.options.headers {
      request = request.header(key, value);
    }

    let mut response = request
      .send()
      .await
      .and_then(|response| response.error_for_status())
      .map_err(|e| TaskError::caused_by(format!("failed to download {}", url), e))?;

    ensure_parent(output)
      .await
      .map_err(|e| TaskError::caused_by(format!("cannot create {}", output.display()), e))?;
    let mut file = tokio::fs::File::create(output)
      .await
      .map_err(|e| TaskError::caused_by(format!("cannot create {}", output.display()), e))?;

    let mut written: u64 = 0;
    while let Some(chunk) = response
      .chunk()
      .await
      .map_err(|e| TaskError::caused_by(format!("failed to read {}", url), e))?
    {
      file
        .write_all(&chunk)
        .await
        .map_err(|e| TaskError::caused_by(format!("cannot write {}", output.display()), e))?;
      written += chunk.len() as u64;
    }
    file
      .flush()
      .await
      .map_err(|e| TaskError::caused_by(format!("cannot write {}", output.display()), e))?;

    info!(url = %url, bytes = written, "downloaded");
    Ok(())
  }
}

pub struct DownloadFactory;

impl TaskFactory for DownloadFactory {
  fn kind(&self) -> TaskKind {
    KIND
  }

  fn description(&self) -> &str {
    "Download a URL to the output"
  }

  fn create(&self, def: &TaskDef) -> Result<Arc<dyn Task>, ResolveError> {
    let options: DownloadOptions = options::parse_required(def)?;
    if options.url.is_empty() {
      return Err(ResolveError::invalid_options(
        def.display_name(),
        "url must not be empty",
      ));
    }
    Ok(Arc::new(DownloadFileTask::new(options)))
  }
}
