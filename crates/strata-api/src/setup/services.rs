//! Service initialization and application state setup

use crate::state::AppState;
use std::sync::Arc;
use strata_core::{Config, SettingsHandle};
use strata_storage::{BucketCatalog, LocationRegistry};
use strata_transfer::{TransferQueue, TransferQueueConfig};

/// Build the registry and transfer queue. Must run inside the Tokio runtime
/// since the queue spawns its dispatcher.
pub fn initialize_services(config: &Config) -> Arc<AppState> {
    let settings = config.settings_handle();
    let registry = LocationRegistry::new(settings.clone(), bucket_catalog(settings));
    let queue = Arc::new(TransferQueue::new(TransferQueueConfig::from_config(config)));

    tracing::info!(
        local_roots = config.storage.local_roots.len(),
        s3_region = %config.storage.s3.region,
        s3_endpoint = ?config.storage.s3.endpoint,
        "Storage services initialized"
    );

    Arc::new(AppState::new(config.clone(), registry, queue))
}

#[cfg(feature = "storage-s3")]
fn bucket_catalog(settings: SettingsHandle) -> Arc<dyn BucketCatalog> {
    Arc::new(strata_storage::AwsBucketCatalog::new(settings))
}

#[cfg(not(feature = "storage-s3"))]
fn bucket_catalog(_settings: SettingsHandle) -> Arc<dyn BucketCatalog> {
    tracing::info!("Object storage support not compiled in; only local locations are served");
    Arc::new(strata_storage::StaticBucketCatalog::new())
}
