use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Cache, existing, install};
use crate::artifact::ArtifactLocation;
use crate::error::ArtifactError;
use crate::reference::ArtifactReference;

/// Stores artifacts in a repository-style hierarchy:
/// `{group}/{artifact}/{version}/{artifact}-{version}[-{classifier}].{extension}`
/// where dots in the group become directory separators.
#[derive(Debug, Clone)]
pub struct RepositoryCache {
  root: PathBuf,
}

impl RepositoryCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Location of the entry for `reference`. Every segment stays a single
  /// normal path component below the root.
  pub fn entry_path(&self, reference: &ArtifactReference) -> PathBuf {
    let mut path = self.root.clone();
    if let Some(group) = reference.group() {
      for part in group.split(['.', '/']).filter(|s| !s.is_empty()) {
        path.push(segment(part));
      }
    }
    path.push(segment(reference.artifact_id()));
    path.push(segment(reference.version()));
    path.push(segment(&reference.file_name()));
    path
  }
}

fn segment(value: &str) -> String {
  let cleaned: String = value
    .chars()
    .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
    .collect();
  match cleaned.as_str() {
    "" | "." | ".." => "_".repeat(cleaned.len().max(1)),
    _ => cleaned,
  }
}

#[async_trait]
impl Cache for RepositoryCache {
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
