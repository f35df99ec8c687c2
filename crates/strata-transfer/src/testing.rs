//! Shared fixtures for transfer tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::memory::InMemory;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_core::models::{FileEntry, FileListing, Pagination};
use strata_core::{LocationKind, S3Settings, SettingsHandle, StorageSettings};
use strata_storage::{
    ByteSink, ByteStream, LocalStorage, PathValidator, S3Storage, StorageAdapter, StorageResult,
    WriteMode,
};

pub fn settings_for(roots: Vec<std::path::PathBuf>) -> SettingsHandle {
    SettingsHandle::new(StorageSettings {
        local_roots: roots,
        max_file_size_bytes: 1024 * 1024 * 1024,
        s3: S3Settings {
            region: "us-east-1".to_string(),
            endpoint: None,
        },
    })
}

pub fn local_adapter(root: &Path) -> Arc<dyn StorageAdapter> {
    Arc::new(LocalStorage::new(
        0,
        PathValidator::new(settings_for(vec![root.to_path_buf()])),
    ))
}

/// Adapters `local-0`, `local-1`, ... sharing one settings handle.
pub fn local_adapters(roots: &[&Path]) -> Vec<Arc<dyn StorageAdapter>> {
    let validator = PathValidator::new(settings_for(
        roots.iter().map(|r| r.to_path_buf()).collect(),
    ));
    (0..roots.len())
        .map(|index| Arc::new(LocalStorage::new(index, validator.clone())) as Arc<dyn StorageAdapter>)
        .collect()
}

pub fn memory_adapter(bucket: &str) -> Arc<dyn StorageAdapter> {
    Arc::new(S3Storage::with_store(
        bucket.to_string(),
        Arc::new(InMemory::new()),
        PathValidator::new(settings_for(vec![])),
    ))
}

pub async fn write_bytes(adapter: &dyn StorageAdapter, path: &str, data: &[u8]) {
    let mut sink = adapter
        .open_write(path, Some(data.len() as u64), WriteMode::Overwrite)
        .await
        .unwrap();
    sink.write(Bytes::copy_from_slice(data)).await.unwrap();
    sink.finish().await.unwrap();
}

pub async fn read_to_vec(adapter: &dyn StorageAdapter, path: &str) -> Vec<u8> {
    let chunks: Vec<Bytes> = adapter
        .open_read(path)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    chunks.concat()
}

/// Delegating adapter whose sinks sleep on every write and record how many
/// are open at once. Walks sleep too and are counted separately.
pub struct SlowAdapter {
    inner: Arc<dyn StorageAdapter>,
    delay: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    walking: Arc<AtomicUsize>,
    walk_peak: Arc<AtomicUsize>,
}

impl SlowAdapter {
    pub fn new(inner: Arc<dyn StorageAdapter>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            walking: Arc::new(AtomicUsize::new(0)),
            walk_peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn walk_peak(&self) -> usize {
        self.walk_peak.load(Ordering::SeqCst)
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SlowSink {
    inner: Box<dyn ByteSink>,
    delay: Duration,
    _guard: ActiveGuard,
}

#[async_trait]
impl ByteSink for SlowSink {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.write(chunk).await
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        self.inner.finish().await
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.inner.abort().await
    }
}

#[async_trait]
impl StorageAdapter for SlowAdapter {
    fn location_id(&self) -> String {
        self.inner.location_id()
    }

    fn kind(&self) -> LocationKind {
        self.inner.kind()
    }

    async fn list(&self, path: &str, page: Pagination) -> StorageResult<FileListing> {
        self.inner.list(path, page).await
    }

    async fn stat(&self, path: &str) -> StorageResult<FileEntry> {
        self.inner.stat(path).await
    }

    async fn open_read(&self, path: &str) -> StorageResult<ByteStream> {
        self.inner.open_read(path).await
    }

    async fn open_write(
        &self,
        path: &str,
        expected_size: Option<u64>,
        mode: WriteMode,
    ) -> StorageResult<Box<dyn ByteSink>> {
        let inner = self.inner.open_write(path, expected_size, mode).await?;
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(SlowSink {
            inner,
            delay: self.delay,
            _guard: ActiveGuard(self.active.clone()),
        }))
    }

    async fn delete(&self, path: &str) -> StorageResult<u64> {
        self.inner.delete(path).await
    }

    async fn mkdir_all(&self, path: &str) -> StorageResult<()> {
        self.inner.mkdir_all(path).await
    }

    async fn walk_files(&self, path: &str) -> StorageResult<Vec<FileEntry>> {
        let now = self.walking.fetch_add(1, Ordering::SeqCst) + 1;
        self.walk_peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(self.walking.clone());
        tokio::time::sleep(self.delay).await;
        self.inner.walk_files(path).await
    }
}
