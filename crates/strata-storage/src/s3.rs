use crate::error::{StorageError, StorageResult};
use crate::path::PathValidator;
use crate::traits::{
    check_expected_size, join_relative, sort_entries, ByteSink, ByteStream, StorageAdapter,
    WriteMode,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{
    ObjectMeta, ObjectStore, ObjectStoreExt, PutMode, PutPayload, WriteMultipart,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use strata_core::models::{FileEntry, FileListing, FileType, Pagination};
use strata_core::{LocationKind, LocationRef};

/// Zero-byte object marking an otherwise empty "directory". Hidden from
/// listings.
pub const DIRECTORY_MARKER: &str = ".keep";

/// Parts buffered in flight per multipart upload.
const MULTIPART_CONCURRENCY: usize = 4;

/// Object path for a validated key, taken verbatim. `Path::from` would
/// percent-encode characters such as `%`, so a listed key would no longer
/// name the object it came from.
fn object_path(key: &str) -> StorageResult<Path> {
    Path::parse(key).map_err(|e| {
        tracing::warn!(key = %key.escape_debug(), error = %e, "Rejected object key");
        StorageError::Security("path is not a valid object key".to_string())
    })
}

/// S3 storage implementation for one bucket
#[derive(Clone)]
pub struct S3Storage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    validator: PathValidator,
}

impl S3Storage {
    /// Create an adapter for `bucket` using the region and endpoint from the
    /// current settings. Credentials come from the AWS environment.
    pub fn new(bucket: String, validator: PathValidator) -> StorageResult<Self> {
        let s3 = validator.settings().snapshot().s3;
        let mut builder = AmazonS3Builder::from_env()
            .with_region(s3.region.clone())
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = s3.endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self::with_store(bucket, Arc::new(store), validator))
    }

    /// Adapter over an existing object store (tests use `InMemory`).
    pub fn with_store(bucket: String, store: Arc<dyn ObjectStore>, validator: PathValidator) -> Self {
        Self {
            store,
            bucket,
            validator,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_entry(meta: &ObjectMeta) -> FileEntry {
        let path = meta.location.as_ref().to_string();
        FileEntry {
            name: meta.location.filename().unwrap_or(&path).to_string(),
            path,
            file_type: FileType::File,
            size: Some(meta.size),
            modified_at: Some(meta.last_modified),
            symlink_target: None,
        }
    }

    fn directory_entry(key: &str) -> FileEntry {
        FileEntry {
            name: key.rsplit('/').next().unwrap_or(key).to_string(),
            path: key.to_string(),
            file_type: FileType::Directory,
            ..Default::default()
        }
    }

    fn is_marker(meta: &ObjectMeta) -> bool {
        meta.location.filename() == Some(DIRECTORY_MARKER)
    }

    /// All objects under `key` treated as a directory prefix.
    async fn objects_under(&self, key: &str) -> StorageResult<Vec<ObjectMeta>> {
        let prefix = object_path(key)?;
        self.store
            .list(Some(&prefix))
            .try_collect()
            .await
            .map_err(|e| StorageError::from_object_store(e, key))
    }

    async fn head(&self, key: &str) -> StorageResult<Option<ObjectMeta>> {
        match self.store.head(&object_path(key)?).await {
            Ok(meta) => Ok(Some(meta)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(StorageError::from_object_store(e, key)),
        }
    }

    fn writable_key(&self, raw: &str) -> StorageResult<String> {
        let key = self.validator.resolve_key(raw)?;
        if key.is_empty() {
            tracing::warn!(bucket = %self.bucket, "Refusing to modify bucket root");
            return Err(StorageError::Security(
                "operation not permitted on the location root".to_string(),
            ));
        }
        Ok(key)
    }
}

#[async_trait]
impl StorageAdapter for S3Storage {
    fn location_id(&self) -> String {
        LocationRef::Bucket(self.bucket.clone()).id()
    }

    fn kind(&self) -> LocationKind {
        LocationKind::S3
    }

    async fn list(&self, path: &str, page: Pagination) -> StorageResult<FileListing> {
        let key = self.validator.resolve_key(path)?;
        let start = std::time::Instant::now();
        let prefix = if key.is_empty() {
            None
        } else {
            Some(object_path(&key)?)
        };

        let result = self
            .store
            .list_with_delimiter(prefix.as_ref())
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    prefix = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 listing failed"
                );
                StorageError::from_object_store(e, &key)
            })?;

        if !key.is_empty() && result.common_prefixes.is_empty() && result.objects.is_empty() {
            return Err(StorageError::NotFound(key));
        }

        let mut entries: Vec<FileEntry> = result
            .common_prefixes
            .iter()
            .map(|p| Self::directory_entry(p.as_ref()))
            .chain(
                result
                    .objects
                    .iter()
                    .filter(|meta| !Self::is_marker(meta))
                    .map(Self::object_entry),
            )
            .collect();

        sort_entries(&mut entries);
        let total_count = entries.len();
        let files = page.apply(entries);

        tracing::debug!(
            bucket = %self.bucket,
            prefix = %key,
            total_count = total_count,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 listing complete"
        );

        Ok(FileListing { files, total_count })
    }

    async fn stat(&self, path: &str) -> StorageResult<FileEntry> {
        let key = self.validator.resolve_key(path)?;
        if key.is_empty() {
            return Ok(FileEntry {
                name: self.bucket.clone(),
                ..Self::directory_entry("")
            });
        }
        if let Some(meta) = self.head(&key).await? {
            return Ok(Self::object_entry(&meta));
        }

        let prefix = object_path(&key)?;
        let listing = self
            .store
            .list_with_delimiter(Some(&prefix))
            .await
            .map_err(|e| StorageError::from_object_store(e, &key))?;
        if listing.common_prefixes.is_empty() && listing.objects.is_empty() {
            return Err(StorageError::NotFound(key));
        }
        Ok(Self::directory_entry(&key))
    }

    async fn open_read(&self, path: &str) -> StorageResult<ByteStream> {
        let key = self.writable_key(path)?;
        let start = std::time::Instant::now();

        let result = self
            .store
            .get(&object_path(&key)?)
            .await
            .map_err(|e| StorageError::from_object_store(e, &key))?;

        let bucket = self.bucket.clone();
        let stream = result.into_stream().map(move |res| {
            res.map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 stream download error"
                );
                StorageError::from_object_store(e, &key)
            })
        });

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
        let key = self.writable_key(path)?;
        let location = object_path(&key)?;
        if mode == WriteMode::CreateNew && self.head(&key).await?.is_some() {
            return Err(StorageError::AlreadyExists(key));
        }

        let upload = self
            .store
            .put_multipart(&location)
            .await
            .map_err(|e| StorageError::from_object_store(e, &key))?;

        Ok(Box::new(S3Sink {
            store: self.store.clone(),
            writer: Some(WriteMultipart::new(upload)),
            location,
            mode,
            bucket: self.bucket.clone(),
            key,
            written: 0,
            limit,
        }))
    }

    async fn delete(&self, path: &str) -> StorageResult<u64> {
        let key = self.writable_key(path)?;
        let start = std::time::Instant::now();

        if self.head(&key).await?.is_some() {
            self.store
                .delete(&object_path(&key)?)
                .await
                .map_err(|e| StorageError::from_object_store(e, &key))?;
            tracing::info!(bucket = %self.bucket, key = %key, "S3 delete successful");
            return Ok(1);
        }

        let objects = self.objects_under(&key).await?;
        if objects.is_empty() {
            return Err(StorageError::NotFound(key));
        }

        // Directories are implicit: count the prefix itself plus every
        // intermediate prefix below it, alongside the real objects.
        let mut directories = BTreeSet::new();
        directories.insert(String::new());
        let mut files = 0u64;
        let dir_prefix = format!("{}/", key);
        for meta in &objects {
            let suffix = meta
                .location
                .as_ref()
                .strip_prefix(dir_prefix.as_str())
                .unwrap_or_default();
            let parts: Vec<&str> = suffix.split('/').collect();
            for depth in 1..parts.len() {
                directories.insert(parts[..depth].join("/"));
            }
            if !Self::is_marker(meta) {
                files += 1;
            }
            self.store
                .delete(&meta.location)
                .await
                .map_err(|e| StorageError::from_object_store(e, meta.location.as_ref()))?;
        }

        let removed = files + directories.len() as u64;
        tracing::info!(
            bucket = %self.bucket,
            prefix = %key,
            items_removed = removed,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 prefix delete successful"
        );
        Ok(removed)
    }

    async fn mkdir_all(&self, path: &str) -> StorageResult<()> {
        let key = self.validator.resolve_key(path)?;
        if key.is_empty() {
            return Ok(());
        }
        if self.head(&key).await?.is_some() {
            return Err(StorageError::AlreadyExists(format!(
                "{} exists and is not a directory",
                key
            )));
        }
        let marker = object_path(&join_relative(&key, DIRECTORY_MARKER))?;
        self.store
            .put(&marker, PutPayload::default())
            .await
            .map_err(|e| StorageError::from_object_store(e, &key))?;
        tracing::debug!(bucket = %self.bucket, key = %key, "Directory marker written");
        Ok(())
    }

    async fn walk_files(&self, path: &str) -> StorageResult<Vec<FileEntry>> {
        let key = self.validator.resolve_key(path)?;
        if !key.is_empty() {
            if let Some(meta) = self.head(&key).await? {
                return Ok(vec![Self::object_entry(&meta)]);
            }
        }

        let mut objects = self.objects_under(&key).await?;
        if objects.is_empty() && !key.is_empty() {
            return Err(StorageError::NotFound(key));
        }
        objects.retain(|meta| !Self::is_marker(meta));
        objects.sort_by(|a, b| a.location.as_ref().cmp(b.location.as_ref()));
        Ok(objects.iter().map(Self::object_entry).collect())
    }

    async fn copy_within(&self, from: &str, to: &str) -> StorageResult<bool> {
        let from_key = self.writable_key(from)?;
        let to_key = self.writable_key(to)?;
        let start = std::time::Instant::now();

        self.store
            .copy(&object_path(&from_key)?, &object_path(&to_key)?)
            .await
            .map_err(|e| StorageError::from_object_store(e, &from_key))?;

        tracing::info!(
            bucket = %self.bucket,
            from_key = %from_key,
            to_key = %to_key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 server-side copy successful"
        );
        Ok(true)
    }
}

/// Multipart upload; nothing is visible until `finish` completes it, so an
/// aborted overwrite leaves the previous object in place.
///
/// `CreateNew` empty objects are written with a conditional put. Multipart
/// completion has no condition in `object_store`, so larger uploads re-check
/// the key just before completing.
struct S3Sink {
    store: Arc<dyn ObjectStore>,
    writer: Option<WriteMultipart>,
    location: Path,
    mode: WriteMode,
    bucket: String,
    key: String,
    written: u64,
    limit: u64,
}

impl S3Sink {
    fn writer(&mut self) -> StorageResult<&mut WriteMultipart> {
        let key = &self.key;
        self.writer
            .as_mut()
            .ok_or_else(|| StorageError::io(format!("{}: upload already closed", key)))
    }
}

#[async_trait]
impl ByteSink for S3Sink {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        let next = self.written + chunk.len() as u64;
        if next > self.limit {
            return Err(StorageError::size_limit(self.limit));
        }
        let key = self.key.clone();
        let writer = self.writer()?;
        writer
            .wait_for_capacity(MULTIPART_CONCURRENCY)
            .await
            .map_err(|e| StorageError::from_object_store(e, &key))?;
        writer.write(&chunk);
        self.written = next;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        let Some(writer) = self.writer.take() else {
            return Err(StorageError::io(format!("{}: upload already closed", self.key)));
        };

        if self.written == 0 {
            // Empty multipart uploads are rejected by some providers.
            writer
                .abort()
                .await
                .map_err(|e| StorageError::from_object_store(e, &self.key))?;
            let put_mode = match self.mode {
                WriteMode::Overwrite => PutMode::Overwrite,
                WriteMode::CreateNew => PutMode::Create,
            };
            self.store
                .put_opts(&self.location, PutPayload::default(), put_mode.into())
                .await
                .map_err(|e| StorageError::from_object_store(e, &self.key))?;
        } else {
            if self.mode == WriteMode::CreateNew {
                match self.store.head(&self.location).await {
                    Ok(_) => {
                        writer
                            .abort()
                            .await
                            .map_err(|e| StorageError::from_object_store(e, &self.key))?;
                        return Err(StorageError::AlreadyExists(self.key.clone()));
                    }
                    Err(object_store::Error::NotFound { .. }) => {}
                    Err(e) => {
                        // Leave the parts to the drop handler's abort.
                        self.writer = Some(writer);
                        return Err(StorageError::from_object_store(e, &self.key));
                    }
                }
            }
            writer
                .finish()
                .await
                .map_err(|e| StorageError::from_object_store(e, &self.key))?;
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %self.key,
            size_bytes = self.written,
            "S3 upload successful"
        );
        Ok(self.written)
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .abort()
                .await
                .map_err(|e| StorageError::from_object_store(e, &self.key))?;
            tracing::debug!(bucket = %self.bucket, key = %self.key, "S3 upload aborted");
        }
        Ok(())
    }
}

impl Drop for S3Sink {
    fn drop(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        let key = self.key.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = writer.abort().await {
                    tracing::warn!(error = %e, key = %key, "Failed to abort abandoned upload");
                }
            });
        }
    }
}
