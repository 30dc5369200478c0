use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::artifact::{Artifact, ArtifactLocation};
use crate::cache::Cache;
use crate::cleanup::{CleanupError, CleanupFailure};
use crate::error::ArtifactError;
use crate::reference::ArtifactReference;

/// Resolves and registers artifacts for a pipeline.
///
/// Resolved artifacts are kept in an in-memory table so repeated lookups of
/// the same reference return the same instance. Misses are not remembered:
/// a reference that is absent now is looked up in the backend again next time.
pub struct ArtifactManager {
  cache: Option<Box<dyn Cache>>,
  artifacts: RwLock<Table>,
}

type Table = HashMap<ArtifactReference, Arc<Artifact>>;

impl ArtifactManager {
  /// Create a manager backed by a durable cache.
  pub fn new(cache: impl Cache + 'static) -> Self {
    Self::from_boxed(Some(Box::new(cache)))
  }

  /// Create a manager that only tracks artifacts registered in this run.
  pub fn without_cache() -> Self {
    Self::from_boxed(None)
  }

  pub fn from_boxed(cache: Option<Box<dyn Cache>>) -> Self {
    Self {
      cache,
      artifacts: RwLock::new(HashMap::new()),
    }
  }

  pub fn is_caching_enabled(&self) -> bool {
    self.cache.is_some()
  }

  /// Resolve an artifact from the table, falling back to the cache.
  ///
  /// Returns `Ok(None)` when neither holds the reference. Entries whose
  /// mounted tree has been released are resolved again.
  pub async fn get_artifact(
    &self,
    reference: &ArtifactReference,
  ) -> Result<Option<Arc<Artifact>>, ArtifactError> {
    {
      let artifacts = self.read()?;
      if let Some(artifact) = artifacts.get(reference)
        && !artifact.is_released()
      {
        return Ok(Some(artifact.clone()));
      }
    }

    let Some(cache) = &self.cache else {
      return Ok(None);
    };

    let Some(location) = cache.lookup(reference).await? else {
      debug!(artifact = %reference, "artifact_not_cached");
      return Ok(None);
    };

    let artifact = Arc::new(Artifact::open(reference.clone(), location).await?);
    Ok(Some(self.insert(artifact)?))
  }

  /// Record an artifact produced at a temporary path.
  ///
  /// With a cache the content is copied to durable storage. If that write
  /// fails, or there is no cache, the artifact is recorded at the temporary
  /// path and marked transient; the caller must keep that path alive for as
  /// long as the artifact is needed.
  pub async fn register_artifact(
    &self,
    reference: &ArtifactReference,
    temporary: &Path,
  ) -> Result<Arc<Artifact>, ArtifactError> {
    let durable = match &self.cache {
      Some(cache) => match cache.write(reference, temporary).await {
        Ok(location) => Some(location),
        Err(e) => {
          warn!(artifact = %reference, error = %e, "artifact_cache_write_failed");
          None
        }
      },
      None => None,
    };

    let artifact = match durable {
      Some(location) => Artifact::open(reference.clone(), location).await?,
      None => Artifact::open(
        reference.clone(),
        ArtifactLocation::Path(temporary.to_path_buf()),
      )
      .await?
      .into_transient(),
    };

    let artifact = Arc::new(artifact);
    let previous = self
      .write()?
      .insert(reference.clone(), artifact.clone());
    if let Some(previous) = previous
      && let Err(e) = previous.close()
    {
      warn!(artifact = %reference, error = %e, "artifact_release_failed");
    }

    debug!(
      artifact = %reference,
      path = %artifact.path().display(),
      transient = artifact.is_transient(),
      "artifact_registered"
    );
    Ok(artifact)
  }

  /// Close every held artifact and forget them.
  pub fn release_all(&self) -> Result<(), CleanupError> {
    let drained: Vec<Arc<Artifact>> = {
      let mut artifacts = self.artifacts.write().unwrap_or_else(|e| e.into_inner());
      artifacts.drain().map(|(_, artifact)| artifact).collect()
    };

    let mut failures: Vec<CleanupFailure> = Vec::new();
    for artifact in drained {
      if let Err(e) = artifact.close() {
        failures.extend(e.into_failures());
      }
    }

    CleanupError::check(failures)
  }

  /// Insert a freshly resolved artifact unless another resolution won the
  /// race, in which case the existing instance is kept.
  fn insert(&self, artifact: Arc<Artifact>) -> Result<Arc<Artifact>, ArtifactError> {
    let mut artifacts = self.write()?;
    let reference = artifact.reference().clone();

    if let Some(existing) = artifacts.get(&reference)
      && !existing.is_released()
    {
      return Ok(existing.clone());
    }

    artifacts.insert(reference, artifact.clone());
    Ok(artifact)
  }

  fn read(&self) -> Result<RwLockReadGuard<'_, Table>, ArtifactError> {
    self.artifacts.read().map_err(|e| ArtifactError::Poisoned {
      message: e.to_string(),
    })
  }

  fn write(&self) -> Result<RwLockWriteGuard<'_, Table>, ArtifactError> {
    self.artifacts.write().map_err(|e| ArtifactError::Poisoned {
      message: e.to_string(),
    })
  }
}

impl std::fmt::Debug for ArtifactManager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ArtifactManager")
      .field("caching_enabled", &self.is_caching_enabled())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use async_trait::async_trait;

  use super::*;
  use crate::cache::LocalFileCache;

  /// Local cache wrapper counting backend calls.
  struct CountingCache {
    inner: LocalFileCache,
    lookups: Arc<AtomicUsize>,
    fail_writes: bool,
  }

  impl CountingCache {
    fn new(root: &Path) -> (Self, Arc<AtomicUsize>) {
      let lookups = Arc::new(AtomicUsize::new(0));
      let cache = Self {
        inner: LocalFileCache::new(root),
        lookups: lookups.clone(),
        fail_writes: false,
      };
      (cache, lookups)
    }
  }

  #[async_trait]
  impl Cache for CountingCache {
    async fn lookup(
      &self,
      reference: &ArtifactReference,
    ) -> Result<Option<ArtifactLocation>, ArtifactError> {
      self.lookups.fetch_add(1, Ordering::SeqCst);
      self.inner.lookup(reference).await
    }

    async fn write(
      &self,
      reference: &ArtifactReference,
      source: &Path,
    ) -> Result<ArtifactLocation, ArtifactError> {
      if self.fail_writes {
        return Err(ArtifactError::io(source, std::io::Error::other("disk full")));
      }
      self.inner.write(reference, source).await
    }
  }

  fn reference() -> ArtifactReference {
    ArtifactReference::new("widget", "1.0", "txt")
  }

  #[tokio::test]
  async fn cached_artifact_is_looked_up_once() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let (cache, lookups) = CountingCache::new(dir.path());
    std::fs::write(dir.path().join("widget-1_0.txt"), "data").expect("failed to write");

    let manager = ArtifactManager::new(cache);
    let first = manager
      .get_artifact(&reference())
      .await
      .expect("should resolve")
      .expect("should exist");
    let second = manager
      .get_artifact(&reference())
      .await
      .expect("should resolve")
      .expect("should exist");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(lookups.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn misses_are_not_remembered() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let (cache, lookups) = CountingCache::new(dir.path());
    let manager = ArtifactManager::new(cache);

    assert!(manager.get_artifact(&reference()).await.expect("ok").is_none());
    assert!(manager.get_artifact(&reference()).await.expect("ok").is_none());

    assert_eq!(lookups.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn register_returns_durable_path_and_skips_backend_on_get() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let (cache, lookups) = CountingCache::new(&dir.path().join("cache"));
    let manager = ArtifactManager::new(cache);

    let temporary = dir.path().join("output.txt");
    std::fs::write(&temporary, "produced").expect("failed to write");

    let registered = manager
      .register_artifact(&reference(), &temporary)
      .await
      .expect("should register");
    assert_ne!(registered.path(), temporary);
    assert!(!registered.is_transient());

    std::fs::remove_file(&temporary).expect("failed to remove");
    let found = manager
      .get_artifact(&reference())
      .await
      .expect("should resolve")
      .expect("should exist");

    assert!(Arc::ptr_eq(&registered, &found));
    assert_eq!(
      std::fs::read_to_string(found.path()).expect("should read"),
      "produced"
    );
    assert_eq!(lookups.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn failed_write_falls_back_to_temporary_path() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let (mut cache, _) = CountingCache::new(dir.path());
    cache.fail_writes = true;
    let manager = ArtifactManager::new(cache);

    let temporary = dir.path().join("output.txt");
    std::fs::write(&temporary, "produced").expect("failed to write");

    let registered = manager
      .register_artifact(&reference(), &temporary)
      .await
      .expect("should register");

    assert_eq!(registered.path(), temporary);
    assert!(registered.is_transient());
  }

  #[tokio::test]
  async fn without_cache_records_temporary_path() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let manager = ArtifactManager::without_cache();
    assert!(!manager.is_caching_enabled());

    assert!(manager.get_artifact(&reference()).await.expect("ok").is_none());

    let temporary = dir.path().join("output.txt");
    std::fs::write(&temporary, "produced").expect("failed to write");
    manager
      .register_artifact(&reference(), &temporary)
      .await
      .expect("should register");

    let found = manager
      .get_artifact(&reference())
      .await
      .expect("should resolve")
      .expect("should exist");
    assert_eq!(found.path(), temporary);
  }

  #[tokio::test]
  async fn release_all_clears_table() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let manager = ArtifactManager::without_cache();
    let temporary = dir.path().join("output.txt");
    std::fs::write(&temporary, "produced").expect("failed to write");
    manager
      .register_artifact(&reference(), &temporary)
      .await
      .expect("should register");

    manager.release_all().expect("should release");

    assert!(manager.get_artifact(&reference()).await.expect("ok").is_none());
  }
}
