use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::cleanup::CleanupError;
use crate::error::ArtifactError;
use crate::reference::ArtifactReference;

/// A directory tree materialized on demand that must be released after use.
///
/// Archive-backed artifacts are extracted into a private directory; the tree
/// is gone once `release` has run.
pub trait MountedTree: Send + Sync + fmt::Debug {
  /// Root of the materialized tree.
  fn root(&self) -> &Path;

  /// Remove the materialized tree.
  fn release(&self) -> Result<(), CleanupError>;
}

/// Where an artifact's content lives.
#[derive(Debug)]
pub enum ArtifactLocation {
  /// A plain file or directory owned by the cache.
  Path(PathBuf),
  /// A tree that exists only until it is released.
  Mounted(Box<dyn MountedTree>),
}

impl ArtifactLocation {
  pub fn path(&self) -> &Path {
    match self {
      ArtifactLocation::Path(path) => path,
      ArtifactLocation::Mounted(tree) => tree.root(),
    }
  }
}

/// A resolved artifact.
///
/// Artifacts are shared as `Arc<Artifact>` between the manager's table and the
/// tasks consuming them. Closing an artifact releases its mounted tree, if any.
/// Closing is idempotent; a plain path has nothing to release.
#[derive(Debug)]
pub struct Artifact {
  reference: ArtifactReference,
  location: ArtifactLocation,
  created: DateTime<Utc>,
  modified: DateTime<Utc>,
  transient: bool,
  released: AtomicBool,
}

impl Artifact {
  /// Build an artifact from a resolved location, reading its timestamps.
  pub async fn open(
    reference: ArtifactReference,
    location: ArtifactLocation,
  ) -> Result<Self, ArtifactError> {
    let metadata = tokio::fs::metadata(location.path())
      .await
      .map_err(|e| ArtifactError::io(location.path(), e))?;

    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let created = metadata.created().unwrap_or(modified);

    Ok(Self {
      reference,
      location,
      created: created.into(),
      modified: modified.into(),
      transient: false,
      released: AtomicBool::new(false),
    })
  }

  /// Mark the artifact as living at a temporary path that no cache owns.
  pub(crate) fn into_transient(mut self) -> Self {
    self.transient = true;
    self
  }

  pub fn reference(&self) -> &ArtifactReference {
    &self.reference
  }

  /// Filesystem path of the artifact content.
  pub fn path(&self) -> &Path {
    self.location.path()
  }

  pub fn created(&self) -> DateTime<Utc> {
    self.created
  }

  pub fn modified(&self) -> DateTime<Utc> {
    self.modified
  }

  /// True when the artifact was recorded at a temporary path because no
  /// durable copy could be written.
  pub fn is_transient(&self) -> bool {
    self.transient
  }

  pub fn is_mounted(&self) -> bool {
    matches!(self.location, ArtifactLocation::Mounted(_))
  }

  /// True once a mounted tree has been released. Plain paths never report
  /// released.
  pub fn is_released(&self) -> bool {
    self.released.load(Ordering::Acquire)
  }

  /// Release the mounted tree, if any.
  pub fn close(&self) -> Result<(), CleanupError> {
    let ArtifactLocation::Mounted(tree) = &self.location else {
      return Ok(());
    };

    if self.released.swap(true, Ordering::AcqRel) {
      return Ok(());
    }

    tree.release()
  }
}

impl Drop for Artifact {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      warn!(artifact = %self.reference, error = %e, "artifact_release_failed");
    }
  }
}
