//! Storage location registry
//!
//! Enumerates configured local roots and the buckets visible to the current
//! object storage credentials, and is the single place where a location id is
//! turned into a concrete adapter.

use crate::error::{StorageError, StorageResult};
use crate::local::LocalStorage;
use crate::path::PathValidator;
use crate::s3::S3Storage;
use crate::traits::StorageAdapter;
use async_trait::async_trait;
use object_store::ObjectStore;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use strata_core::models::StorageLocation;
use strata_core::{LocationKind, LocationRef, SettingsHandle};

/// Source of buckets and their object stores.
#[async_trait]
pub trait BucketCatalog: Send + Sync {
    /// Bucket names visible to the configured credentials.
    async fn list_buckets(&self) -> StorageResult<Vec<String>>;

    /// Adapter for one bucket.
    fn open(&self, bucket: &str, validator: &PathValidator) -> StorageResult<S3Storage>;
}

/// Catalog backed by the AWS SDK (`ListBuckets`) and `object_store`'s S3
/// client. Settings are read on every call so region or endpoint changes
/// apply immediately.
#[cfg(feature = "storage-s3")]
#[derive(Clone, Debug)]
pub struct AwsBucketCatalog {
    settings: SettingsHandle,
}

#[cfg(feature = "storage-s3")]
impl AwsBucketCatalog {
    pub fn new(settings: SettingsHandle) -> Self {
        Self { settings }
    }

    async fn client(&self) -> aws_sdk_s3::Client {
        let s3 = self.settings.snapshot().s3;
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(s3.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = s3.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        aws_sdk_s3::Client::from_conf(builder.build())
    }
}

#[cfg(feature = "storage-s3")]
#[async_trait]
impl BucketCatalog for AwsBucketCatalog {
    async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        let start = std::time::Instant::now();
        let output = self
            .client()
            .await
            .list_buckets()
            .send()
            .await
            .map_err(|e| {
                StorageError::io(format!(
                    "ListBuckets failed: {}",
                    aws_sdk_s3::error::DisplayErrorContext(&e)
                ))
            })?;

        let buckets: Vec<String> = output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_string))
            .collect();

        tracing::debug!(
            bucket_count = buckets.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Listed buckets"
        );
        Ok(buckets)
    }

    fn open(&self, bucket: &str, validator: &PathValidator) -> StorageResult<S3Storage> {
        S3Storage::new(bucket.to_string(), validator.clone())
    }
}

/// Fixed set of buckets over caller-provided object stores. Used when no
/// object storage is configured (empty) and in tests (`InMemory`).
#[derive(Clone, Default)]
pub struct StaticBucketCatalog {
    stores: BTreeMap<String, Arc<dyn ObjectStore>>,
}

impl StaticBucketCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(bucket.into(), store);
        self
    }
}

#[async_trait]
impl BucketCatalog for StaticBucketCatalog {
    async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        Ok(self.stores.keys().cloned().collect())
    }

    fn open(&self, bucket: &str, validator: &PathValidator) -> StorageResult<S3Storage> {
        let store = self
            .stores
            .get(bucket)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("bucket {}", bucket)))?;
        Ok(S3Storage::with_store(
            bucket.to_string(),
            store,
            validator.clone(),
        ))
    }
}

#[derive(Clone)]
pub struct LocationRegistry {
    validator: PathValidator,
    catalog: Arc<dyn BucketCatalog>,
}

impl LocationRegistry {
    pub fn new(settings: SettingsHandle, catalog: Arc<dyn BucketCatalog>) -> Self {
        Self {
            validator: PathValidator::new(settings),
            catalog,
        }
    }

    pub fn validator(&self) -> &PathValidator {
        &self.validator
    }

    /// All locations, local roots first. Probed on every call.
    pub async fn list(&self) -> Vec<StorageLocation> {
        let settings = self.validator.settings().snapshot();
        let mut locations = Vec::with_capacity(settings.local_roots.len());

        for (index, root) in settings.local_roots.iter().enumerate() {
            let id = LocationRef::Local(index).id();
            let available = match check_root(root).await {
                Ok(()) => true,
                Err(reason) => {
                    tracing::warn!(
                        location_id = %id,
                        root = %root.display(),
                        reason = %reason,
                        "Local storage root unavailable"
                    );
                    false
                }
            };
            locations.push(StorageLocation {
                id,
                name: display_name(root),
                kind: LocationKind::Local,
                available,
                root: Some(root.display().to_string()),
                region: None,
            });
        }

        match self.catalog.list_buckets().await {
            Ok(buckets) => {
                locations.extend(buckets.into_iter().map(|bucket| StorageLocation {
                    id: LocationRef::Bucket(bucket.clone()).id(),
                    name: bucket,
                    kind: LocationKind::S3,
                    available: true,
                    root: None,
                    region: Some(settings.s3.region.clone()),
                }));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list buckets; continuing with local storage only");
            }
        }

        locations
    }

    /// One location by id.
    pub async fn location(&self, id: &str) -> StorageResult<StorageLocation> {
        self.list()
            .await
            .into_iter()
            .find(|location| location.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("location {}", id)))
    }

    /// Resolve a location id to its adapter.
    pub fn adapter(&self, id: &str) -> StorageResult<Arc<dyn StorageAdapter>> {
        let location: LocationRef = id
            .parse()
            .map_err(|_| StorageError::NotFound(format!("location {}", id)))?;

        match location {
            LocationRef::Local(index) => {
                self.validator.root(index)?;
                Ok(Arc::new(LocalStorage::new(index, self.validator.clone())))
            }
            LocationRef::Bucket(bucket) => {
                Ok(Arc::new(self.catalog.open(&bucket, &self.validator)?))
            }
        }
    }
}

/// Exists, is a directory, and its entries can be read.
async fn check_root(root: &Path) -> Result<(), String> {
    let meta = tokio::fs::metadata(root)
        .await
        .map_err(|e| format!("cannot stat root: {}", e))?;
    if !meta.is_dir() {
        return Err("root is not a directory".to_string());
    }
    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(|e| format!("cannot read root: {}", e))?;
    entries
        .next_entry()
        .await
        .map_err(|e| format!("cannot read root entries: {}", e))?;
    Ok(())
}

fn display_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use std::path::PathBuf;
    use strata_core::{S3Settings, StorageSettings};
    use tempfile::tempdir;

    struct FailingCatalog;

    #[async_trait]
    impl BucketCatalog for FailingCatalog {
        async fn list_buckets(&self) -> StorageResult<Vec<String>> {
            Err(StorageError::PermissionDenied("ListBuckets".to_string()))
        }

        fn open(&self, bucket: &str, _validator: &PathValidator) -> StorageResult<S3Storage> {
            Err(StorageError::NotFound(bucket.to_string()))
        }
    }

    fn settings(roots: Vec<PathBuf>) -> SettingsHandle {
        SettingsHandle::new(StorageSettings {
            local_roots: roots,
            max_file_size_bytes: 1024,
            s3: S3Settings {
                region: "eu-west-1".to_string(),
                endpoint: None,
            },
        })
    }

    #[tokio::test]
    async fn test_list_marks_missing_roots_unavailable() {
        let dir = tempdir().unwrap();
        let models = dir.path().join("models");
        std::fs::create_dir(&models).unwrap();
        let catalog = StaticBucketCatalog::new().with_bucket("ml-data", Arc::new(InMemory::new()));
        let registry = LocationRegistry::new(
            settings(vec![models, dir.path().join("missing")]),
            Arc::new(catalog),
        );

        let locations = registry.list().await;
        assert_eq!(locations.len(), 3);
        assert_eq!(locations[0].id, "local-0");
        assert_eq!(locations[0].name, "models");
        assert!(locations[0].available);
        assert_eq!(locations[1].id, "local-1");
        assert!(!locations[1].available);
        assert_eq!(locations[2].id, "s3:ml-data");
        assert_eq!(locations[2].kind, LocationKind::S3);
        assert_eq!(locations[2].region.as_deref(), Some("eu-west-1"));
    }

    #[tokio::test]
    async fn test_list_marks_non_directory_roots_unavailable() {
        let dir = tempdir().unwrap();
        let file_root = dir.path().join("not-a-dir");
        std::fs::write(&file_root, b"x").unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        let registry = LocationRegistry::new(
            settings(vec![file_root, dir.path().join("empty")]),
            Arc::new(StaticBucketCatalog::new()),
        );

        let locations = registry.list().await;
        assert_eq!(locations.len(), 2);
        assert!(!locations[0].available);
        assert!(locations[1].available, "an empty root is still readable");
    }

    #[tokio::test]
    async fn test_bucket_listing_failure_keeps_local_locations() {
        let dir = tempdir().unwrap();
        let registry = LocationRegistry::new(
            settings(vec![dir.path().to_path_buf()]),
            Arc::new(FailingCatalog),
        );
        let locations = registry.list().await;
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].kind, LocationKind::Local);
    }

    #[tokio::test]
    async fn test_adapter_resolution() {
        let dir = tempdir().unwrap();
        let catalog = StaticBucketCatalog::new().with_bucket("ml-data", Arc::new(InMemory::new()));
        let registry =
            LocationRegistry::new(settings(vec![dir.path().to_path_buf()]), Arc::new(catalog));

        let local = registry.adapter("local-0").unwrap();
        assert_eq!(local.kind(), LocationKind::Local);
        assert_eq!(local.location_id(), "local-0");

        let bucket = registry.adapter("s3:ml-data").unwrap();
        assert_eq!(bucket.kind(), LocationKind::S3);

        for id in ["local-5", "nonsense", "s3:other-bucket"] {
            assert!(
                matches!(registry.adapter(id), Err(StorageError::NotFound(_))),
                "{} should not resolve",
                id
            );
        }

        assert_eq!(registry.location("s3:ml-data").await.unwrap().name, "ml-data");
        assert!(registry.location("local-9").await.is_err());
    }

    #[tokio::test]
    async fn test_runtime_root_change_applies() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        let handle = settings(vec![first.path().to_path_buf()]);
        let registry = LocationRegistry::new(handle.clone(), Arc::new(StaticBucketCatalog::new()));
        assert!(registry.adapter("local-1").is_err());

        handle.update(|s| s.local_roots.push(second.path().to_path_buf()));
        assert!(registry.adapter("local-1").is_ok());
        assert_eq!(registry.list().await.len(), 2);
    }
}
