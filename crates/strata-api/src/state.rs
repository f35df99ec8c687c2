//! Application state shared by every handler.

use std::sync::Arc;
use strata_core::Config;
use strata_storage::LocationRegistry;
use strata_transfer::{ConflictDetector, TransferQueue};

pub struct AppState {
    pub config: Config,
    pub registry: LocationRegistry,
    pub queue: Arc<TransferQueue>,
    pub conflicts: ConflictDetector,
}

impl AppState {
    pub fn new(config: Config, registry: LocationRegistry, queue: Arc<TransferQueue>) -> Self {
        let conflicts = queue.conflict_detector();
        Self {
            config,
            registry,
            queue,
            conflicts,
        }
    }
}
