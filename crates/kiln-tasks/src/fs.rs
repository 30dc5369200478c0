use std::path::Path;

/// Create the parent directory of `path` if it has one.
pub(crate) async fn ensure_parent(path: &Path) -> std::io::Result<()> {
  match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
    _ => Ok(()),
  }
}
