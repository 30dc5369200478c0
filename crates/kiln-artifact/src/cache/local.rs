use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Cache, existing, install};
use crate::artifact::ArtifactLocation;
use crate::error::ArtifactError;
use crate::reference::ArtifactReference;

/// Stores every artifact in a single flat directory.
///
/// Entries are named `{name}-{version}[-{classifier}].{extension}` with every
/// character outside `[A-Za-z0-9_]` in each segment replaced by `_`.
#[derive(Debug, Clone)]
pub struct LocalFileCache {
  root: PathBuf,
}

impl LocalFileCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Where the given reference is stored.
  pub fn entry_path(&self, reference: &ArtifactReference) -> PathBuf {
    let mut name = format!(
      "{}-{}",
      sanitize(reference.name()),
      sanitize(reference.version())
    );
    if let Some(classifier) = reference.classifier() {
      name.push('-');
      name.push_str(&sanitize(classifier));
    }
    name.push('.');
    name.push_str(&sanitize(reference.extension()));
    self.root.join(name)
  }
}

fn sanitize(segment: &str) -> String {
  segment
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
    .collect()
}

#[async_trait]
impl Cache for LocalFileCache {
  async fn lookup(
    &self,
    reference: &ArtifactReference,
  ) -> Result<Option<ArtifactLocation>, ArtifactError> {
    Ok(
      existing(self.entry_path(reference))
        .await?
        .map(ArtifactLocation::Path),
    )
  }

  async fn write(
    &self,
    reference: &ArtifactReference,
    source: &Path,
  ) -> Result<ArtifactLocation, ArtifactError> {
    let dest = self.entry_path(reference);
    install(source, &dest).await?;
    Ok(ArtifactLocation::Path(dest))
  }
}
