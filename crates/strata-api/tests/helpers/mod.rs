//! Test helpers: build AppState and router over temporary local roots and an
//! in-memory bucket.
//!
//! Run with: `cargo test -p strata-api`

use axum_test::TestServer;
use object_store::memory::InMemory;
use std::sync::Arc;
use strata_api::constants;
use strata_api::setup::routes;
use strata_api::state::AppState;
use strata_core::Config;
use strata_storage::{LocationRegistry, StaticBucketCatalog};
use strata_transfer::{TransferQueue, TransferQueueConfig};
use tempfile::TempDir;

pub const TEST_BUCKET: &str = "test-bucket";

/// API path prefix for tests (e.g. `/api/v1`).
pub fn api_path(path: &str) -> String {
    format!("{}{}", constants::API_PREFIX, path)
}

/// Test application: server, state, and owned resources.
pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub roots: Vec<TempDir>,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    pub fn root(&self, index: usize) -> &std::path::Path {
        self.roots[index].path()
    }

    /// Lower the size limit without restarting.
    pub fn set_max_file_size(&self, bytes: u64) {
        self.state
            .registry
            .validator()
            .settings()
            .update(|settings| settings.max_file_size_bytes = bytes);
    }
}

/// Two local roots (`local-0`, `local-1`) and one in-memory bucket
/// (`s3:test-bucket`).
pub async fn setup_test_app() -> TestApp {
    let roots = vec![
        tempfile::tempdir().expect("Failed to create temp directory"),
        tempfile::tempdir().expect("Failed to create temp directory"),
    ];
    let local_paths = roots
        .iter()
        .map(|dir| dir.path().display().to_string())
        .collect::<Vec<_>>()
        .join(",");

    let config = Config::from_lookup(|key| match key {
        "LOCAL_STORAGE_PATHS" => Some(local_paths.clone()),
        "MAX_CONCURRENT_TRANSFERS" => Some("2".to_string()),
        _ => None,
    });

    let catalog = StaticBucketCatalog::new().with_bucket(TEST_BUCKET, Arc::new(InMemory::new()));
    let registry = LocationRegistry::new(config.settings_handle(), Arc::new(catalog));
    let queue = Arc::new(TransferQueue::new(TransferQueueConfig::from_config(&config)));
    let state = Arc::new(AppState::new(config.clone(), registry, queue));

    let router = routes::setup_routes(&config, state.clone()).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to start test server");

    TestApp {
        server,
        state,
        roots,
    }
}
