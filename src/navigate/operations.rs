//! Navigation operations implementation

use crate::error::NavigateError;
use crate::storage::validation::{parent_virtual_path, resolve_virtual_path, virtual_to_real_path};
use log::warn;
use std::path::Path;
use tokio::fs;

/// Changes the working directory for a client
pub async fn change_directory(
    server_root: &Path,
    current_virtual_path: &str,
    target_path: &str,
) -> Result<String, NavigateError> {
    // Validate target path
    if target_path.is_empty() {
        return Err(NavigateError::InvalidPath("Empty path provided".into()));
    }

    let new_virtual_path = resolve_virtual_path(current_virtual_path, target_path)?;
    enter_directory(server_root, new_virtual_path, target_path).await
}

/// Moves to the parent directory; at the root this stays at the root.
pub async fn change_to_parent(
    server_root: &Path,
    current_virtual_path: &str,
) -> Result<String, NavigateError> {
    let parent = parent_virtual_path(current_virtual_path);
    enter_directory(server_root, parent, "..").await
}

async fn enter_directory(
    server_root: &Path,
    virtual_path: String,
    requested: &str,
) -> Result<String, NavigateError> {
    let real_path = virtual_to_real_path(server_root, &virtual_path);

    let metadata = fs::metadata(&real_path)
        .await
        .map_err(|_| NavigateError::DirectoryNotFound(virtual_path.clone()))?;
    if !metadata.is_dir() {
        return Err(NavigateError::NotADirectory(virtual_path));
    }

    // Symlinks must not lead outside the server root
    let canonical_path = fs::canonicalize(&real_path)
        .await
        .map_err(|_| NavigateError::DirectoryNotFound(virtual_path.clone()))?;
    let server_root_canonical = fs::canonicalize(server_root)
        .await
        .map_err(|_| NavigateError::InvalidPath("Server root invalid".into()))?;
    if !canonical_path.starts_with(&server_root_canonical) {
        warn!("Refused {} resolving outside the server root", requested);
        return Err(NavigateError::PathTraversal(requested.into()));
    }

    Ok(virtual_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn moves_within_the_root() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("pub/docs")).unwrap();
        std::fs::write(root.path().join("pub/readme"), b"x").unwrap();

        assert_eq!(
            change_directory(root.path(), "/", "pub/docs").await.unwrap(),
            "/pub/docs"
        );
        assert_eq!(change_to_parent(root.path(), "/pub/docs").await.unwrap(), "/pub");
        assert_eq!(change_to_parent(root.path(), "/").await.unwrap(), "/");

        assert!(matches!(
            change_directory(root.path(), "/pub", "readme").await,
            Err(NavigateError::NotADirectory(_))
        ));
        assert!(matches!(
            change_directory(root.path(), "/", "missing").await,
            Err(NavigateError::DirectoryNotFound(_))
        ));
        assert!(matches!(
            change_directory(root.path(), "/", "../..").await,
            Err(NavigateError::PathTraversal(_))
        ));
    }
}
