use crate::error::{StorageError, StorageResult};
use crate::path::{normalize, PathValidator};
use crate::traits::{
    check_expected_size, join_relative, sort_entries, ByteSink, ByteStream, StorageAdapter,
    WriteMode, TRANSFER_CHUNK_SIZE,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use strata_core::models::{FileEntry, FileListing, FileType, Pagination};
use strata_core::{LocationKind, LocationRef};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use walkdir::WalkDir;

/// Name prefix of in-progress writes. Such files live next to their
/// destination and are hidden from listings and walks.
const PARTIAL_PREFIX: &str = ".strata-partial-";

/// Local filesystem storage rooted at one configured directory.
///
/// The root is looked up through the shared settings on every call, so a
/// runtime settings change applies to the next operation.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    index: usize,
    validator: PathValidator,
}

impl LocalStorage {
    /// Adapter for location `local-{index}`.
    pub fn new(index: usize, validator: PathValidator) -> Self {
        Self { index, validator }
    }

    /// Normalized relative path plus validated absolute path.
    async fn locate(&self, raw: &str) -> StorageResult<(PathBuf, String)> {
        let relative = normalize(raw)?;
        let absolute = self.validator.resolve(self.index, &relative).await?;
        Ok((absolute, relative))
    }
}

fn is_partial(name: &str) -> bool {
    name.starts_with(PARTIAL_PREFIX)
}

async fn run_blocking<T, F>(what: &str, f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::io(format!("{} task failed: {}", what, e)))?
}

/// Build the entry for an existing path. Symlinks that leave the root yield
/// `None`. Blocking.
fn build_entry(
    location_id: &str,
    canonical_root: &Path,
    absolute: &Path,
    relative: String,
    meta: &Metadata,
) -> Option<FileEntry> {
    let name = relative
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or(".")
        .to_string();
    let modified_at = meta.modified().ok().map(DateTime::<Utc>::from);

    if meta.file_type().is_symlink() {
        if !PathValidator::stays_within(canonical_root, absolute) {
            tracing::debug!(
                location_id = %location_id,
                path = %relative,
                "Hiding symlink that leaves the location root"
            );
            return None;
        }
        let target = std::fs::canonicalize(absolute).ok();
        let target_meta = std::fs::metadata(absolute).ok();
        let symlink_target = target.as_deref().and_then(|t| {
            t.strip_prefix(canonical_root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        });
        return Some(FileEntry {
            name,
            path: relative,
            file_type: FileType::Symlink,
            size: target_meta.filter(|m| m.is_file()).map(|m| m.len()),
            modified_at,
            symlink_target,
        });
    }

    let (file_type, size) = if meta.is_dir() {
        (FileType::Directory, None)
    } else {
        (FileType::File, Some(meta.len()))
    };
    Some(FileEntry {
        name,
        path: relative,
        file_type,
        size,
        modified_at,
        symlink_target: None,
    })
}

/// Direct children of `dir`, unsorted. Blocking.
fn read_entries(
    location_id: &str,
    canonical_root: &Path,
    dir: &Path,
    relative: &str,
) -> StorageResult<Vec<FileEntry>> {
    let reader = std::fs::read_dir(dir).map_err(|e| StorageError::from_io(e, relative))?;
    let mut entries = Vec::new();
    for item in reader {
        let item = item.map_err(|e| StorageError::from_io(e, relative))?;
        let name = item.file_name().to_string_lossy().into_owned();
        if is_partial(&name) {
            continue;
        }
        let child = join_relative(relative, &name);
        let meta = match item.path().symlink_metadata() {
            Ok(meta) => meta,
            Err(e) => {
                // Entry vanished or is unreadable; skip it rather than fail the listing.
                tracing::debug!(error = %e, path = %child, "Skipping unreadable entry");
                continue;
            }
        };
        if let Some(entry) = build_entry(location_id, canonical_root, &item.path(), child, &meta) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Files below the directory `absolute`, in name order. Symlinked files that
/// stay inside the root are included; symlinked directories are not
/// descended. Blocking.
fn walk_dir(
    location_id: &str,
    canonical_root: &Path,
    absolute: &Path,
    relative: &str,
) -> StorageResult<Vec<FileEntry>> {
    let mut files = Vec::new();
    for item in WalkDir::new(absolute).follow_links(false).sort_by_file_name() {
        let item = item.map_err(|e| StorageError::io(format!("{}: {}", relative, e)))?;
        let file_type = item.file_type();
        if file_type.is_dir() || is_partial(&item.file_name().to_string_lossy()) {
            continue;
        }
        let Ok(suffix) = item.path().strip_prefix(absolute) else {
            continue;
        };
        let child = join_relative(relative, &suffix.to_string_lossy().replace('\\', "/"));
        if file_type.is_symlink() {
            match std::fs::metadata(item.path()) {
                Ok(target) if target.is_file() => {}
                Ok(_) => {
                    tracing::debug!(
                        location_id = %location_id,
                        path = %child,
                        "Not following symlinked directory"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::debug!(error = %e, path = %child, "Skipping dangling symlink");
                    continue;
                }
            }
        } else if !file_type.is_file() {
            continue;
        }
        let meta = item
            .metadata()
            .map_err(|e| StorageError::io(format!("{}: {}", child, e)))?;
        if let Some(entry) = build_entry(location_id, canonical_root, item.path(), child, &meta) {
            files.push(entry);
        }
    }
    Ok(files)
}

#[async_trait]
impl StorageAdapter for LocalStorage {
    fn location_id(&self) -> String {
        LocationRef::Local(self.index).id()
    }

    fn kind(&self) -> LocationKind {
        LocationKind::Local
    }

    async fn list(&self, path: &str, page: Pagination) -> StorageResult<FileListing> {
        let (dir, relative) = self.locate(path).await?;
        let start = std::time::Instant::now();
        let canonical_root = self.validator.canonical_root(self.index).await?;

        let meta = fs::metadata(&dir)
            .await
            .map_err(|e| StorageError::from_io(e, &relative))?;
        if !meta.is_dir() {
            return Err(StorageError::NotFound(format!("{} is not a directory", relative)));
        }

        let location_id = self.location_id();
        let listed = relative.clone();
        let mut entries = run_blocking("list", move || {
            read_entries(&location_id, &canonical_root, &dir, &listed)
        })
        .await?;

        sort_entries(&mut entries);
        let total_count = entries.len();
        let files = page.apply(entries);

        tracing::debug!(
            location_id = %self.location_id(),
            path = %relative,
            total_count = total_count,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local listing complete"
        );

        Ok(FileListing { files, total_count })
    }

    async fn stat(&self, path: &str) -> StorageResult<FileEntry> {
        let (absolute, relative) = self.locate(path).await?;
        let canonical_root = self.validator.canonical_root(self.index).await?;
        let location_id = self.location_id();
        run_blocking("stat", move || {
            let meta = absolute
                .symlink_metadata()
                .map_err(|e| StorageError::from_io(e, &relative))?;
            build_entry(&location_id, &canonical_root, &absolute, relative.clone(), &meta)
                .ok_or(StorageError::NotFound(relative))
        })
        .await
    }

    async fn open_read(&self, path: &str) -> StorageResult<ByteStream> {
        let (absolute, relative) = self.locate(path).await?;
        let meta = fs::metadata(&absolute)
            .await
            .map_err(|e| StorageError::from_io(e, &relative))?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(format!("{} is not a file", relative)));
        }

        let file = fs::File::open(&absolute)
            .await
            .map_err(|e| StorageError::from_io(e, &relative))?;
        let stream = tokio_util::io::ReaderStream::with_capacity(file, TRANSFER_CHUNK_SIZE).map(
            move |result| {
                result.map_err(|e| {
                    tracing::error!(error = %e, path = %relative, "Local stream read error");
                    StorageError::from_io(e, &relative)
                })
            },
        );
        Ok(Box::pin(stream))
    }

    async fn open_write(
        &self,
        path: &str,
        expected_size: Option<u64>,
        mode: WriteMode,
    ) -> StorageResult<Box<dyn ByteSink>> {
        let limit = self.validator.settings().max_file_size_bytes();
        check_expected_size(expected_size, limit)?;

        let (absolute, relative) = self.validator.resolve_entry(self.index, path).await?;
        if let Ok(meta) = fs::symlink_metadata(&absolute).await {
            if meta.is_dir() {
                return Err(StorageError::AlreadyExists(format!(
                    "{} is a directory",
                    relative
                )));
            }
            if mode == WriteMode::CreateNew {
                return Err(StorageError::AlreadyExists(relative));
            }
        }
        let parent = absolute
            .parent()
            .ok_or_else(|| StorageError::io(format!("{}: no parent directory", relative)))?
            .to_path_buf();
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| StorageError::from_io(e, &relative))?;

        let partial = parent.join(format!("{}{}", PARTIAL_PREFIX, Uuid::new_v4().simple()));
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)
            .await
            .map_err(|e| StorageError::from_io(e, &relative))?;

        Ok(Box::new(LocalSink {
            file: Some(file),
            partial,
            absolute,
            relative,
            mode,
            written: 0,
            limit,
            done: false,
        }))
    }

    async fn delete(&self, path: &str) -> StorageResult<u64> {
        let (absolute, relative) = self.validator.resolve_entry(self.index, path).await?;
        let start = std::time::Instant::now();
        let meta = fs::symlink_metadata(&absolute)
            .await
            .map_err(|e| StorageError::from_io(e, &relative))?;

        let removed = if meta.is_dir() {
            let walk_root = absolute.clone();
            let count = run_blocking("delete", move || {
                Ok(WalkDir::new(walk_root)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(Result::ok)
                    .count() as u64)
            })
            .await?;
            fs::remove_dir_all(&absolute)
                .await
                .map_err(|e| StorageError::from_io(e, &relative))?;
            count
        } else {
            fs::remove_file(&absolute)
                .await
                .map_err(|e| StorageError::from_io(e, &relative))?;
            1
        };

        tracing::info!(
            location_id = %self.location_id(),
            path = %relative,
            items_removed = removed,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local delete successful"
        );
        Ok(removed)
    }

    async fn mkdir_all(&self, path: &str) -> StorageResult<()> {
        let (absolute, relative) = self.locate(path).await?;
        if let Ok(meta) = fs::metadata(&absolute).await {
            if meta.is_dir() {
                return Ok(());
            }
            return Err(StorageError::AlreadyExists(format!(
                "{} exists and is not a directory",
                relative
            )));
        }
        fs::create_dir_all(&absolute)
            .await
            .map_err(|e| StorageError::from_io(e, &relative))?;
        tracing::debug!(location_id = %self.location_id(), path = %relative, "Directory created");
        Ok(())
    }

    async fn walk_files(&self, path: &str) -> StorageResult<Vec<FileEntry>> {
        let (absolute, relative) = self.locate(path).await?;
        let canonical_root = self.validator.canonical_root(self.index).await?;
        let location_id = self.location_id();
        run_blocking("walk", move || {
            let meta = absolute
                .symlink_metadata()
                .map_err(|e| StorageError::from_io(e, &relative))?;
            if meta.is_dir() {
                return walk_dir(&location_id, &canonical_root, &absolute, &relative);
            }
            build_entry(&location_id, &canonical_root, &absolute, relative.clone(), &meta)
                .map(|entry| vec![entry])
                .ok_or(StorageError::NotFound(relative))
        })
        .await
    }
}

/// Writes into a hidden sibling of the destination and moves it into place
/// on `finish`, so the destination only ever holds complete content. The
/// partial file is removed on abort or when the sink is dropped unfinished.
struct LocalSink {
    file: Option<fs::File>,
    partial: PathBuf,
    absolute: PathBuf,
    relative: String,
    mode: WriteMode,
    written: u64,
    limit: u64,
    done: bool,
}

impl LocalSink {
    /// Move the partial file to the destination according to the write mode.
    async fn commit(&self) -> StorageResult<()> {
        match self.mode {
            WriteMode::Overwrite => fs::rename(&self.partial, &self.absolute)
                .await
                .map_err(|e| StorageError::from_io(e, &self.relative)),
            WriteMode::CreateNew => {
                // A hard link fails atomically if the destination appeared
                // since the sink was opened.
                match fs::hard_link(&self.partial, &self.absolute).await {
                    Ok(()) => {
                        if let Err(e) = fs::remove_file(&self.partial).await {
                            tracing::warn!(
                                error = %e,
                                path = %self.relative,
                                "Failed to remove partial file"
                            );
                        }
                        Ok(())
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                        Err(StorageError::AlreadyExists(self.relative.clone()))
                    }
                    Err(e) => {
                        tracing::debug!(
                            error = %e,
                            path = %self.relative,
                            "Hard link unavailable, renaming"
                        );
                        if fs::symlink_metadata(&self.absolute).await.is_ok() {
                            return Err(StorageError::AlreadyExists(self.relative.clone()));
                        }
                        fs::rename(&self.partial, &self.absolute)
                            .await
                            .map_err(|e| StorageError::from_io(e, &self.relative))
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ByteSink for LocalSink {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        let next = self.written + chunk.len() as u64;
        if next > self.limit {
            return Err(StorageError::size_limit(self.limit));
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::io(format!("{}: sink already closed", self.relative)))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| StorageError::from_io(e, &self.relative))?;
        self.written = next;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| StorageError::from_io(e, &self.relative))?;
            file.sync_all()
                .await
                .map_err(|e| StorageError::from_io(e, &self.relative))?;
        }
        // On failure the drop below removes the partial file.
        self.commit().await?;
        self.done = true;
        tracing::debug!(
            path = %self.relative,
            size_bytes = self.written,
            "Local write committed"
        );
        Ok(self.written)
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        self.file.take();
        self.done = true;
        match fs::remove_file(&self.partial).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(e, &self.relative)),
        }
    }
}

impl Drop for LocalSink {
    fn drop(&mut self) {
        if !self.done {
            self.file.take();
            if let Err(e) = std::fs::remove_file(&self.partial) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(error = %e, path = %self.relative, "Failed to remove partial file");
                }
            }
        }
    }
}
