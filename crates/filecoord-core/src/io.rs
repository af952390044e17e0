//! The byte-level file-I/O contract.
//!
//! Coordination code never touches the filesystem except through
//! [`FileIo`], so the whole stack can run against the in-memory fake.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

/// Byte encoding expected of a coordinated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encoding {
    /// Raw bytes, no decoding expectations.
    #[default]
    Binary,
    /// Contents must be valid UTF-8; reads verify decodability.
    Utf8,
}

/// Per-handle I/O options.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IoOptions {
    pub encoding: Encoding,
}

impl IoOptions {
    pub fn binary() -> Self {
        Self {
            encoding: Encoding::Binary,
        }
    }

    pub fn text() -> Self {
        Self {
            encoding: Encoding::Utf8,
        }
    }
}

/// Subset of file metadata exposed through `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Narrow asynchronous file-I/O interface used by coordinated handles.
///
/// Errors pass through unmodified; retry policy, if any, belongs to the
/// caller.
pub trait FileIo: Send + Sync {
    fn read(&self, path: &Path) -> impl Future<Output = io::Result<Vec<u8>>> + Send;
    fn write(&self, path: &Path, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
    fn append(&self, path: &Path, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
    fn stat(&self, path: &Path) -> impl Future<Output = io::Result<FileStat>> + Send;
    fn unlink(&self, path: &Path) -> impl Future<Output = io::Result<()>> + Send;
}

/// Disk-backed implementation on tokio's asynchronous filesystem.
///
/// Parent directories are created on write/append so per-worker
/// namespacing works without a separate setup step.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFileIo;

impl DiskFileIo {
    async fn ensure_parent(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

impl FileIo for DiskFileIo {
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        Self::ensure_parent(path).await?;
        tokio::fs::write(path, data).await
    }

    async fn append(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        Self::ensure_parent(path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(data).await?;
        file.flush().await
    }

    async fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(FileStat {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    async fn unlink(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

/// In-memory implementation for tests and benches.
#[derive(Debug, Default)]
pub struct MemoryFileIo {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryFileIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file: {}", path.display()),
    )
}

impl FileIo for MemoryFileIo {
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    async fn append(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.files
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    async fn stat(&self, path: &Path) -> io::Result<FileStat> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|data| FileStat {
                len: data.len() as u64,
                modified: None,
            })
            .ok_or_else(|| not_found(path))
    }

    async fn unlink(&self, path: &Path) -> io::Result<()> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_write_read_roundtrip() {
        let io = MemoryFileIo::new();
        let path = Path::new("/virtual/a.log");
        io.write(path, b"hello").await.unwrap();
        assert_eq!(io.read(path).await.unwrap(), b"hello");
        assert_eq!(io.stat(path).await.unwrap().len, 5);
    }

    #[tokio::test]
    async fn memory_append_creates_missing_file() {
        let io = MemoryFileIo::new();
        let path = Path::new("/virtual/b.log");
        io.append(path, b"one").await.unwrap();
        io.append(path, b"two").await.unwrap();
        assert_eq!(io.read(path).await.unwrap(), b"onetwo");
    }

    #[tokio::test]
    async fn memory_unlink_removes_and_errors_when_missing() {
        let io = MemoryFileIo::new();
        let path = Path::new("/virtual/c.log");
        io.write(path, b"x").await.unwrap();
        io.unlink(path).await.unwrap();
        assert!(!io.contains(path));
        let err = io.unlink(path).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn memory_read_missing_is_not_found() {
        let io = MemoryFileIo::new();
        let err = io.read(Path::new("/virtual/none")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn disk_append_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("a.log");
        let io = DiskFileIo;
        io.append(&path, b"line1\n").await.unwrap();
        io.append(&path, b"line2\n").await.unwrap();
        assert_eq!(io.read(&path).await.unwrap(), b"line1\nline2\n");
        let stat = io.stat(&path).await.unwrap();
        assert_eq!(stat.len, 12);
        io.unlink(&path).await.unwrap();
        assert!(io.read(&path).await.is_err());
    }
}
