use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder};
use tempfile::TempDir;
use tokio::task;

use super::{Cache, LocalFileCache, discard, existing, staging_path};
use crate::artifact::{ArtifactLocation, MountedTree};
use crate::cleanup::{CleanupError, remove_tree};
use crate::error::ArtifactError;
use crate::reference::ArtifactReference;

/// Name of the single top-level entry in every archive.
const CONTENT: &str = "content";

/// Stores each artifact as a gzip-compressed tar archive.
///
/// Lookups extract the archive into a private temporary directory and hand it
/// out as a mounted tree; the extraction is deleted when the artifact is
/// closed.
#[derive(Debug, Clone)]
pub struct ArchiveCache {
  names: LocalFileCache,
}

impl ArchiveCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      names: LocalFileCache::new(root),
    }
  }

  pub fn root(&self) -> &Path {
    self.names.root()
  }

  pub fn entry_path(&self, reference: &ArtifactReference) -> PathBuf {
    let mut path = self.names.entry_path(reference).into_os_string();
    path.push(".tar.gz");
    PathBuf::from(path)
  }
}

#[async_trait]
impl Cache for ArchiveCache {
  async fn lookup(
    &self,
    reference: &ArtifactReference,
  ) -> Result<Option<ArtifactLocation>, ArtifactError> {
    let Some(archive) = existing(self.entry_path(reference)).await? else {
      return Ok(None);
    };
    let tree = mount(archive).await?;
    Ok(Some(ArtifactLocation::Mounted(Box::new(tree))))
  }

  async fn write(
    &self,
    reference: &ArtifactReference,
    source: &Path,
  ) -> Result<ArtifactLocation, ArtifactError> {
    let dest = self.entry_path(reference);
    if let Some(parent) = dest.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| ArtifactError::io(parent, e))?;
    }

    let staging = staging_path(&dest);
    let source_path = source.to_path_buf();
    let target = staging.clone();
    task::spawn_blocking(move || pack(&source_path, &target))
      .await
      .map_err(|e| ArtifactError::Archive {
        path: staging.clone(),
        source: io::Error::other(e),
      })?
      .map_err(|e| ArtifactError::Archive {
        path: staging.clone(),
        source: e,
      })?;

    discard(&dest).await?;
    tokio::fs::rename(&staging, &dest)
      .await
      .map_err(|e| ArtifactError::io(&dest, e))?;

    let tree = mount(dest).await?;
    Ok(ArtifactLocation::Mounted(Box::new(tree)))
  }
}

fn pack(source: &Path, dest: &Path) -> io::Result<()> {
  let file = File::create(dest)?;
  let mut tar = Builder::new(GzEncoder::new(file, Compression::default()));

  if source.is_dir() {
    tar.append_dir_all(CONTENT, source)?;
  } else {
    tar.append_path_with_name(source, CONTENT)?;
  }

  let encoder = tar.into_inner()?;
  encoder.finish()?;
  Ok(())
}

fn unpack(archive: &Path, dest: &Path) -> io::Result<()> {
  let file = File::open(archive)?;
  let mut archive = Archive::new(GzDecoder::new(file));
  archive.unpack(dest)
}

async fn mount(archive: PathBuf) -> Result<ExtractedArchive, ArtifactError> {
  let dir = tempfile::Builder::new()
    .prefix("kiln_mount_")
    .tempdir()
    .map_err(|e| ArtifactError::io(std::env::temp_dir(), e))?;

  let dest = dir.path().to_path_buf();
  let source = archive.clone();
  task::spawn_blocking(move || unpack(&source, &dest))
    .await
    .map_err(|e| ArtifactError::Archive {
      path: archive.clone(),
      source: io::Error::other(e),
    })?
    .map_err(|e| ArtifactError::Archive {
      path: archive.clone(),
      source: e,
    })?;

  Ok(ExtractedArchive {
    root: dir.path().join(CONTENT),
    dir: Mutex::new(Some(dir)),
  })
}

/// An archive extracted into a temporary directory.
#[derive(Debug)]
struct ExtractedArchive {
  root: PathBuf,
  dir: Mutex<Option<TempDir>>,
}

impl MountedTree for ExtractedArchive {
  fn root(&self) -> &Path {
    &self.root
  }

  fn release(&self) -> Result<(), CleanupError> {
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
