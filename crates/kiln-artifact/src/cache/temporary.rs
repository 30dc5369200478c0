use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;

use super::{Cache, LocalFileCache};
use crate::artifact::ArtifactLocation;
use crate::cleanup::{CleanupError, remove_tree};
use crate::error::ArtifactError;
use crate::reference::ArtifactReference;

/// A cache that lives for one run only.
///
/// Lookups always miss, so every task producing an artifact runs again, but
/// written artifacts stay on disk until the cache is closed or dropped.
#[derive(Debug)]
pub struct TemporaryFileCache {
  inner: LocalFileCache,
  dir: Mutex<Option<TempDir>>,
}

impl TemporaryFileCache {
  pub fn new() -> Result<Self, ArtifactError> {
    let dir = tempfile::Builder::new()
      .prefix("kiln_cache_")
      .tempdir()
      .map_err(|e| ArtifactError::io(std::env::temp_dir(), e))?;

    Ok(Self {
      inner: LocalFileCache::new(dir.path()),
      dir: Mutex::new(Some(dir)),
    })
  }

  pub fn root(&self) -> &Path {
    self.inner.root()
  }

  /// Delete the cache directory and everything written to it.
  pub fn close(&self) -> Result<(), CleanupError> {
    let dir = self
      .dir
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .take();

    let Some(dir) = dir else {
      return Ok(());
    };

    let mut failures = Vec::new();
    remove_tree(dir.path(), &mut failures);
    drop(dir);
    CleanupError::check(failures)
  }
}

#[async_trait]
impl Cache for TemporaryFileCache {
  async fn lookup(
    &self,
    _reference: &ArtifactReference,
  ) -> Result<Option<ArtifactLocation>, ArtifactError> {
    Ok(None)
  }

  async fn write(
    &self,
    reference: &ArtifactReference,
    source: &Path,
  ) -> Result<ArtifactLocation, ArtifactError> {
    self.inner.write(reference, source).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn lookup_always_misses() {
    let cache = TemporaryFileCache::new().expect("should create");
    let reference = ArtifactReference::new("widget", "1.0", "txt");

    let source = tempfile::NamedTempFile::new().expect("failed to create file");
    std::fs::write(source.path(), "data").expect("failed to write");

    let location = cache
      .write(&reference, source.path())
      .await
      .expect("should write");
    assert!(location.path().is_file());

    let found = cache.lookup(&reference).await.expect("lookup should succeed");
    assert!(found.is_none());
  }

  #[tokio::test]
  async fn close_removes_directory() {
    let cache = TemporaryFileCache::new().expect("should create");
    let root = cache.root().to_path_buf();
    let source = tempfile::NamedTempFile::new().expect("failed to create file");
    cache
      .write(&ArtifactReference::new("widget", "1.0", "txt"), source.path())
      .await
      .expect("should write");

    cache.close().expect("should close");
    cache.close().expect("second close is a no-op");

    assert!(!root.exists());
  }

  #[test]
  fn drop_removes_directory() {
    let cache = TemporaryFileCache::new().expect("should create");
    let root = cache.root().to_path_buf();
    assert!(root.exists());

    drop(cache);

    assert!(!root.exists());
  }
}
