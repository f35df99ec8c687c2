//! Storage abstraction trait
//!
//! This module defines the `StorageAdapter` trait implemented by every storage
//! backend, plus the streaming types used to move bytes in and out.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use strata_core::models::{FileEntry, FileListing, Pagination};
use strata_core::LocationKind;

use crate::error::{StorageError, StorageResult};

/// Chunk size used when streaming file contents (64 KiB).
pub const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

/// Stream of file contents.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// What a write does when the destination already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the existing entry once the write commits.
    #[default]
    Overwrite,
    /// Fail with [`StorageError::AlreadyExists`] if the entry exists, checked
    /// both when the sink opens and atomically when it commits.
    CreateNew,
}

/// Destination for a streamed write.
///
/// Exactly one of [`finish`](ByteSink::finish) or [`abort`](ByteSink::abort)
/// should be called. Nothing is visible at the destination until `finish`
/// succeeds; a sink aborted or dropped without either leaves any previous
/// content untouched and cleans up after itself.
#[async_trait]
pub trait ByteSink: Send {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()>;

    /// Commit the data and return the number of bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Discard everything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Storage abstraction trait
///
/// All paths are location-relative (see the crate docs). Implementations
/// validate every path before touching storage.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Location id this adapter serves (`local-0`, `s3:bucket`).
    fn location_id(&self) -> String;

    fn kind(&self) -> LocationKind;

    /// List the direct children of a directory, directories first then by
    /// name, with offset/limit applied after sorting.
    async fn list(&self, path: &str, page: Pagination) -> StorageResult<FileListing>;

    async fn stat(&self, path: &str) -> StorageResult<FileEntry>;

    async fn open_read(&self, path: &str) -> StorageResult<ByteStream>;

    /// Open a sink that writes `path`, creating parent directories as
    /// needed. An `expected_size` above the configured limit is rejected
    /// before anything is written.
    async fn open_write(
        &self,
        path: &str,
        expected_size: Option<u64>,
        mode: WriteMode,
    ) -> StorageResult<Box<dyn ByteSink>>;

    /// Delete a file or a directory tree. Returns the number of items removed.
    async fn delete(&self, path: &str) -> StorageResult<u64>;

    /// Create a directory and its parents. Succeeds if it already exists.
    async fn mkdir_all(&self, path: &str) -> StorageResult<()>;

    /// Recursively collect the files below `path`, in name order.
    async fn walk_files(&self, path: &str) -> StorageResult<Vec<FileEntry>>;

    /// Copy inside this location without streaming through the process.
    /// Returns `false` when the backend has no native copy.
    async fn copy_within(&self, _from: &str, _to: &str) -> StorageResult<bool> {
        Ok(false)
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Reject an announced size above `limit`.
pub(crate) fn check_expected_size(expected: Option<u64>, limit: u64) -> StorageResult<()> {
    match expected {
        Some(size) if size > limit => Err(StorageError::size_limit(limit)),
        _ => Ok(()),
    }
}

/// Sort entries directories first, then by name.
pub(crate) fn sort_entries(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| b.is_dir().cmp(&a.is_dir()).then_with(|| a.name.cmp(&b.name)));
}

/// Join a location-relative directory and a child name.
pub(crate) fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::models::FileType;

    fn entry(name: &str, file_type: FileType) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            path: name.to_string(),
            file_type,
            ..Default::default()
        }
    }

    #[test]
    fn test_sort_entries_directories_first() {
        let mut entries = vec![
            entry("b.txt", FileType::File),
            entry("zeta", FileType::Directory),
            entry("a.txt", FileType::File),
            entry("alpha", FileType::Directory),
        ];
        sort_entries(&mut entries);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta", "a.txt", "b.txt"]);
    }

    #[test]
    fn test_check_expected_size() {
        assert!(check_expected_size(None, 10).is_ok());
        assert!(check_expected_size(Some(10), 10).is_ok());
        assert!(check_expected_size(Some(11), 10).is_err());
    }

    #[test]
    fn test_join_relative() {
        assert_eq!(join_relative("", "a"), "a");
        assert_eq!(join_relative("dir", "a"), "dir/a");
    }
}
