//! Path validation
//!
//! Virtual paths are what clients see: absolute, `/`-separated, rooted at the
//! server root. Resolution never climbs above that root.

use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Resolves `target` against the virtual directory `current`.
///
/// `.` and empty segments are dropped and `..` pops one level; popping past
/// `/` is a traversal attempt.
pub fn resolve_virtual_path(current: &str, target: &str) -> Result<String, StorageError> {
    if target.contains('\0') || target.contains('\\') {
        return Err(StorageError::InvalidPath(target.to_string()));
    }

    let mut segments: Vec<&str> = Vec::new();
    if !target.starts_with('/') {
        segments.extend(current.split('/').filter(|s| !s.is_empty() && *s != "."));
    }

    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(StorageError::PathTraversal(target.to_string()));
                }
            }
            name => segments.push(name),
        }
    }

    Ok(format!("/{}", segments.join("/")))
}

/// Maps a resolved virtual path onto the file system under `server_root`.
pub fn virtual_to_real_path(server_root: &Path, virtual_path: &str) -> PathBuf {
    let relative = virtual_path.trim_start_matches('/');
    if relative.is_empty() {
        server_root.to_path_buf()
    } else {
        server_root.join(relative)
    }
}

/// Parent of a virtual directory; the root is its own parent.
pub fn parent_virtual_path(current: &str) -> String {
    match current.trim_end_matches('/').rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent.to_string(),
        _ => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_and_absolute_targets() {
        assert_eq!(resolve_virtual_path("/", "pub").unwrap(), "/pub");
        assert_eq!(resolve_virtual_path("/pub", "docs/./a").unwrap(), "/pub/docs/a");
        assert_eq!(resolve_virtual_path("/pub/docs", "..").unwrap(), "/pub");
        assert_eq!(resolve_virtual_path("/pub/docs", "/other").unwrap(), "/other");
        assert_eq!(resolve_virtual_path("/pub", "//x//y/").unwrap(), "/x/y");
        assert_eq!(resolve_virtual_path("/pub", "../").unwrap(), "/");
    }

    #[test]
    fn refuses_to_climb_above_root() {
        assert!(matches!(
            resolve_virtual_path("/", ".."),
            Err(StorageError::PathTraversal(_))
        ));
        assert!(matches!(
            resolve_virtual_path("/pub", "../../etc/passwd"),
            Err(StorageError::PathTraversal(_))
        ));
        assert!(matches!(
            resolve_virtual_path("/", "a\\..\\b"),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn maps_virtual_onto_real_and_finds_parents() {
        let root = Path::new("/srv/ftp");
        assert_eq!(virtual_to_real_path(root, "/"), PathBuf::from("/srv/ftp"));
        assert_eq!(
            virtual_to_real_path(root, "/pub/a.txt"),
            PathBuf::from("/srv/ftp/pub/a.txt")
        );
        assert_eq!(parent_virtual_path("/pub/docs"), "/pub");
        assert_eq!(parent_virtual_path("/pub"), "/");
        assert_eq!(parent_virtual_path("/"), "/");
    }
}
