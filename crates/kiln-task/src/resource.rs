//! Tracking and release of temporary files and directories.

use std::path::{Path, PathBuf};

use kiln_artifact::{CleanupError, remove_path, remove_tree};
use tokio::fs;
use tracing::{debug, warn};

const PREFIX: &str = "kiln_task_";

/// Owns temporary directories and files allocated for a unit of work.
///
/// `release` deletes everything the scope owns, deepest entries first,
/// ignoring entries that are already gone and reporting every other failure
/// at once. A scope releases at most once; dropping an unreleased scope
/// releases it and logs any failure.
#[derive(Debug)]
pub struct ResourceScope {
  base: PathBuf,
  directories: Vec<PathBuf>,
  files: Vec<PathBuf>,
  released: bool,
}

impl ResourceScope {
  /// A scope allocating under the system temporary directory.
  pub fn new() -> Self {
    Self::in_dir(std::env::temp_dir())
  }

  /// A scope allocating under `base`.
  pub fn in_dir(base: impl Into<PathBuf>) -> Self {
    Self {
      base: base.into(),
      directories: Vec::new(),
      files: Vec::new(),
      released: false,
    }
  }

  fn unique_path(&self) -> PathBuf {
    self
      .base
      .join(format!("{}{}", PREFIX, uuid::Uuid::new_v4().simple()))
  }

  /// Create a fresh, empty directory owned by this scope.
  pub async fn allocate_directory(&mut self) -> std::io::Result<PathBuf> {
    fs::create_dir_all(&self.base).await?;
    let path = self.unique_path();
    fs::create_dir(&path).await?;
    self.directories.push(path.clone());
    Ok(path)
  }

  /// Create a fresh, empty file owned by this scope.
  pub async fn allocate_file(&mut self) -> std::io::Result<PathBuf> {
    fs::create_dir_all(&self.base).await?;
    let path = self.unique_path();
    fs::OpenOptions::new()
      .write(true)
      .create_new(true)
      .open(&path)
      .await?;
    self.files.push(path.clone());
    Ok(path)
  }

  /// Take ownership of a directory allocated elsewhere.
  pub fn adopt_directory(&mut self, path: impl Into<PathBuf>) {
    self.directories.push(path.into());
  }

  /// Stop tracking a path so this scope will not delete it.
  pub fn forget(&mut self, path: &Path) -> bool {
    let before = self.directories.len() + self.files.len();
    self.directories.retain(|p| p != path);
    self.files.retain(|p| p != path);
    before != self.directories.len() + self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.directories.is_empty() && self.files.is_empty()
  }

  pub fn is_released(&self) -> bool {
    self.released
  }

  /// Delete every owned file and directory.
  pub fn release(&mut self) -> Result<(), CleanupError> {
    if self.released {
      return Ok(());
    }
    self.released = true;

    let mut failures = Vec::new();
    for file in std::mem::take(&mut self.files) {
      remove_path(&file, &mut failures);
    }
    // Later allocations may live inside earlier ones.
    for directory in std::mem::take(&mut self.directories).into_iter().rev() {
      remove_tree(&directory, &mut failures);
    }

    debug!(failures = failures.len(), "resources_released");
    CleanupError::check(failures)
  }
}

impl Default for ResourceScope {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for ResourceScope {
  fn drop(&mut self) {
    if let Err(e) = self.release() {
      warn!(error = %e, "resource_release_failed");
    }
  }
}
