//! Durable storage backends for artifacts.

mod archive;
mod local;
mod repository;
mod temporary;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::artifact::ArtifactLocation;
use crate::error::ArtifactError;
use crate::reference::ArtifactReference;

pub use archive::ArchiveCache;
pub use local::LocalFileCache;
pub use repository::RepositoryCache;
pub use temporary::TemporaryFileCache;

/// Durable storage for artifacts, keyed by reference.
#[async_trait]
pub trait Cache: Send + Sync {
  /// Locate a stored artifact. A missing entry is `Ok(None)`.
  async fn lookup(
    &self,
    reference: &ArtifactReference,
  ) -> Result<Option<ArtifactLocation>, ArtifactError>;

  /// Copy the content at `source` into durable storage and return where it
  /// now lives. Any previous entry for the reference is replaced.
  async fn write(
    &self,
    reference: &ArtifactReference,
    source: &Path,
  ) -> Result<ArtifactLocation, ArtifactError>;
}

#[async_trait]
impl<C: Cache + ?Sized> Cache for Box<C> {
  async fn lookup(
    &self,
    reference: &ArtifactReference,
  ) -> Result<Option<ArtifactLocation>, ArtifactError> {
    (**self).lookup(reference).await
  }

  async fn write(
    &self,
    reference: &ArtifactReference,
    source: &Path,
  ) -> Result<ArtifactLocation, ArtifactError> {
    (**self).write(reference, source).await
  }
}

/// Return the path if it exists on disk.
pub(crate) async fn existing(path: PathBuf) -> Result<Option<PathBuf>, ArtifactError> {
  match fs::try_exists(&path).await {
    Ok(true) => Ok(Some(path)),
    Ok(false) => Ok(None),
    Err(e) => Err(ArtifactError::io(path, e)),
  }
}

/// Copy a file or directory tree to `dest`, replacing whatever was there.
///
/// Content is staged in a `.partial` sibling and renamed into place so a
/// reader never observes a half-written entry.
pub(crate) async fn install(source: &Path, dest: &Path) -> Result<(), ArtifactError> {
  if let Some(parent) = dest.parent() {
    fs::create_dir_all(parent)
      .await
      .map_err(|e| ArtifactError::io(parent, e))?;
  }

  let staging = staging_path(dest);
  discard(&staging).await?;

  let metadata = fs::metadata(source)
    .await
    .map_err(|e| ArtifactError::io(source, e))?;
  if metadata.is_dir() {
    copy_dir_recursive(source, &staging)
      .await
      .map_err(|e| ArtifactError::io(source, e))?;
  } else {
    fs::copy(source, &staging)
      .await
      .map_err(|e| ArtifactError::io(source, e))?;
  }

  discard(dest).await?;
  fs::rename(&staging, dest)
    .await
    .map_err(|e| ArtifactError::io(dest, e))
}

pub(crate) fn staging_path(dest: &Path) -> PathBuf {
  let mut name = dest.file_name().unwrap_or_default().to_os_string();
  name.push(".partial");
  dest.with_file_name(name)
}

/// Remove a file or directory if present.
pub(crate) async fn discard(path: &Path) -> Result<(), ArtifactError> {
  let result = match fs::symlink_metadata(path).await {
    Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path).await,
    Ok(_) => fs::remove_file(path).await,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
    Err(e) => Err(e),
  };
  result.map_err(|e| ArtifactError::io(path, e))
}

/// Copy the directory tree at `src` into `dest`, creating `dest` as needed.
pub async fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<(), std::io::Error> {
  fs::create_dir_all(dest).await?;

  let mut entries = fs::read_dir(src).await?;
  while let Some(entry) = entries.next_entry().await? {
    let src_path = entry.path();
    let dest_path = dest.join(entry.file_name());

    if entry.file_type().await?.is_dir() {
      Box::pin(copy_dir_recursive(&src_path, &dest_path)).await?;
    } else {
      fs::copy(&src_path, &dest_path).await?;
    }
  }

  Ok(())
}
