//! File system operations
//!
//! The local file-system collaborator: open for read, open for write (append
//! or truncate), and directory listings.

use log::{error, info, warn};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};

use crate::error::StorageError;
use crate::storage::validation::{resolve_virtual_path, virtual_to_real_path};

/// One directory entry as shown in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Opens `filename` (relative to the virtual directory `current`) for reading.
///
/// Returns the file, its size, and its resolved virtual path.
pub async fn open_for_read(
    server_root: &Path,
    current: &str,
    filename: &str,
) -> Result<(File, u64, String), StorageError> {
    if filename.is_empty() {
        return Err(StorageError::InvalidPath("Empty filename".into()));
    }

    let virtual_path = resolve_virtual_path(current, filename)?;
    let real_path = virtual_to_real_path(server_root, &virtual_path);

    let metadata = match fs::metadata(&real_path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StorageError::FileNotFound(virtual_path));
        }
        Err(e) => return Err(StorageError::from(e)),
    };
    if !metadata.is_file() {
        return Err(StorageError::NotAFile(virtual_path));
    }

    // Symlinks must not lead outside the server root
    let canonical_path = fs::canonicalize(&real_path).await?;
    let root_canonical = fs::canonicalize(server_root).await?;
    if !canonical_path.starts_with(&root_canonical) {
        warn!(
            "Refused {} resolving to {} outside the server root",
            virtual_path,
            canonical_path.display()
        );
        return Err(StorageError::PathTraversal(virtual_path));
    }

    let file = File::open(&canonical_path).await?;
    info!(
        "Opened {} (real: {}) for retrieval, {} bytes",
        virtual_path,
        real_path.display(),
        metadata.len()
    );
    Ok((file, metadata.len(), virtual_path))
}

/// Opens a local file for writing, creating it if needed.
pub async fn open_for_write(path: &Path, append: bool) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .await
}

/// Sibling of `target` that a download is written to before it replaces it.
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

/// Lists the virtual directory `current`, sorted by name.
pub async fn list_entries(
    server_root: &Path,
    current: &str,
) -> Result<Vec<EntryInfo>, StorageError> {
    let real_path = virtual_to_real_path(server_root, current);
    let mut dir = fs::read_dir(&real_path).await.map_err(|e| {
        error!(
            "Failed to list directory {} (real: {}): {}",
            current,
            real_path.display(),
            e
        );
        StorageError::from(e)
    })?;

    let mut entries = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let (is_dir, size) = match entry.metadata().await {
            Ok(metadata) => (
                metadata.is_dir(),
                if metadata.is_dir() { 0 } else { metadata.len() },
            ),
            Err(_) => (false, 0),
        };
        entries.push(EntryInfo { name, is_dir, size });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    info!("Listed directory {} - {} entries", current, entries.len());
    Ok(entries)
}

/// Renders entries as `ls -l` style lines, each terminated by CRLF.
pub fn format_listing(entries: &[EntryInfo]) -> String {
    entries
        .iter()
        .map(|entry| {
            let mode = if entry.is_dir { "drwxr-xr-x" } else { "-rw-r--r--" };
            format!("{} 1 ftp ftp {:>12} {}\r\n", mode, entry.size, entry.name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn opens_files_and_rejects_directories() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("pub")).unwrap();
        std::fs::write(root.path().join("pub/a.txt"), b"hello").unwrap();

        let (mut file, size, virtual_path) =
            open_for_read(root.path(), "/pub", "a.txt").await.unwrap();
        assert_eq!(size, 5);
        assert_eq!(virtual_path, "/pub/a.txt");
        let mut body = String::new();
        file.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "hello");

        assert!(matches!(
            open_for_read(root.path(), "/", "pub").await,
            Err(StorageError::NotAFile(_))
        ));
        assert!(matches!(
            open_for_read(root.path(), "/", "missing").await,
            Err(StorageError::FileNotFound(_))
        ));
        assert!(matches!(
            open_for_read(root.path(), "/", "../secret").await,
            Err(StorageError::PathTraversal(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_out_of_root_is_refused() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"top secret").unwrap();
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            root.path().join("leak.txt"),
        )
        .unwrap();
        std::fs::write(root.path().join("real.txt"), b"fine").unwrap();
        std::os::unix::fs::symlink(root.path().join("real.txt"), root.path().join("alias.txt"))
            .unwrap();

        assert!(matches!(
            open_for_read(root.path(), "/", "leak.txt").await,
            Err(StorageError::PathTraversal(_))
        ));
        let (_, size, _) = open_for_read(root.path(), "/", "alias.txt").await.unwrap();
        assert_eq!(size, 4);
    }

    #[test]
    fn partial_path_sits_beside_target() {
        assert_eq!(
            partial_path(Path::new("/tmp/out/report.pdf")),
            PathBuf::from("/tmp/out/report.pdf.part")
        );
    }

    #[tokio::test]
    async fn write_appends_or_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut file = open_for_write(&path, false).await.unwrap();
        file.write_all(b"first").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let mut file = open_for_write(&path, true).await.unwrap();
        file.write_all(b"+more").await.unwrap();
        file.flush().await.unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"first+more");

        let mut file = open_for_write(&path, false).await.unwrap();
        file.write_all(b"new").await.unwrap();
        file.flush().await.unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[tokio::test]
    async fn listing_is_sorted_and_crlf_terminated() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("b.txt"), b"12345").unwrap();
        std::fs::create_dir(root.path().join("a_dir")).unwrap();

        let entries = list_entries(root.path(), "/").await.unwrap();
        assert_eq!(
            entries,
            vec![
                EntryInfo {
                    name: "a_dir".into(),
                    is_dir: true,
                    size: 0
                },
                EntryInfo {
                    name: "b.txt".into(),
                    is_dir: false,
                    size: 5
                },
            ]
        );

        let listing = format_listing(&entries);
        let lines: Vec<&str> = listing.split_terminator("\r\n").collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("drwxr-xr-x") && lines[0].ends_with(" a_dir"));
        assert!(lines[1].starts_with("-rw-r--r--") && lines[1].ends_with("5 b.txt"));
    }
}
