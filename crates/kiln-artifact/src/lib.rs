//! Artifacts for kiln pipelines.
//!
//! An artifact is a file or directory tree produced by one task and consumed
//! by others, addressed by an [`ArtifactReference`]. The [`ArtifactManager`]
//! is the single point through which artifacts are looked up and registered.
//! It keeps an in-memory table of resolved artifacts and delegates durable
//! storage to an optional [`Cache`] backend.
//!
//! ```text
//!   get_artifact(ref) ──► table ──hit──► Arc<Artifact>
//!                           │
//!                          miss
//!                           ▼
//!                     Cache::lookup ──► Artifact::open ──► table
//!
//!   register_artifact(ref, tmp) ──► Cache::write ──► durable location
//!                                        │
//!                                      error ──► transient (tmp path)
//! ```

mod artifact;
pub mod cache;
mod cleanup;
mod error;
mod manager;
mod reference;

pub use artifact::{Artifact, ArtifactLocation, MountedTree};
pub use cache::{
  ArchiveCache, Cache, LocalFileCache, RepositoryCache, TemporaryFileCache, copy_dir_recursive,
};
pub use cleanup::{CleanupError, CleanupFailure, remove_path, remove_tree};
pub use error::ArtifactError;
pub use manager::ArtifactManager;
pub use reference::ArtifactReference;
