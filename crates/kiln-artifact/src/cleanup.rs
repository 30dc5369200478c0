//! Removal of temporary files and directory trees.
//!
//! Removal is synchronous so it can run from `Drop`. Entries that have
//! already disappeared are ignored; every other failure is collected so the
//! caller can report all of them at once.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A single path that could not be removed.
#[derive(Debug)]
pub struct CleanupFailure {
  pub path: PathBuf,
  pub source: io::Error,
}

impl fmt::Display for CleanupFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({})", self.path.display(), self.source)
  }
}

/// Aggregate of every path a release pass failed to remove.
#[derive(Debug, Error)]
#[error("failed to release temporary resources: {}", render(.failures))]
pub struct CleanupError {
  failures: Vec<CleanupFailure>,
}

impl CleanupError {
  /// Returns `Ok(())` when nothing failed.
  pub fn check(failures: Vec<CleanupFailure>) -> Result<(), CleanupError> {
    if failures.is_empty() {
      Ok(())
    } else {
      Err(CleanupError { failures })
    }
  }

  pub fn failures(&self) -> &[CleanupFailure] {
    &self.failures
  }

  /// Paths that remained on disk.
  pub fn paths(&self) -> impl Iterator<Item = &Path> {
    self.failures.iter().map(|failure| failure.path.as_path())
  }

  pub fn into_failures(self) -> Vec<CleanupFailure> {
    self.failures
  }
}

fn render(failures: &[CleanupFailure]) -> String {
  failures
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join(", ")
}

/// Remove a single file, tolerating its absence.
pub fn remove_path(path: &Path, failures: &mut Vec<CleanupFailure>) {
  match std::fs::remove_file(path) {
    Ok(()) => {}
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(source) => failures.push(CleanupFailure {
      path: path.to_path_buf(),
      source,
    }),
  }
}

/// Remove a directory tree, deepest entries first.
///
/// Files are removed before the directory holding them and a directory is
/// only removed after all of its children. A failure on one entry does not
/// stop removal of its siblings.
pub fn remove_tree(root: &Path, failures: &mut Vec<CleanupFailure>) {
  let metadata = match std::fs::symlink_metadata(root) {
    Ok(metadata) => metadata,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return,
    Err(source) => {
      failures.push(CleanupFailure {
        path: root.to_path_buf(),
        source,
      });
      return;
    }
  };

  if !metadata.is_dir() {
    remove_path(root, failures);
    return;
  }

  match std::fs::read_dir(root) {
    Ok(entries) => {
      for entry in entries {
        match entry {
          Ok(entry) => remove_tree(&entry.path(), failures),
          Err(source) => failures.push(CleanupFailure {
            path: root.to_path_buf(),
            source,
          }),
        }
      }
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => return,
    Err(source) => failures.push(CleanupFailure {
      path: root.to_path_buf(),
      source,
    }),
  }

  match std::fs::remove_dir(root) {
    Ok(()) => {}
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(source) => failures.push(CleanupFailure {
      path: root.to_path_buf(),
      source,
    }),
  }
}
