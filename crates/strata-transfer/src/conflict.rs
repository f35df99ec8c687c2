//! Pre-flight conflict detection.

use std::sync::Arc;

use futures::future::try_join_all;
use strata_core::models::TransferConflict;
use strata_storage::{StorageAdapter, StorageError};
use tokio::sync::Semaphore;

use crate::error::{TransferError, TransferResult};

/// Reports which destination paths already exist.
///
/// Checks run concurrently, each holding a permit from the semaphore that
/// also bounds file copies, so a large batch check cannot starve transfers.
#[derive(Clone)]
pub struct ConflictDetector {
    semaphore: Arc<Semaphore>,
}

impl ConflictDetector {
    pub fn new(semaphore: Arc<Semaphore>) -> Self {
        Self { semaphore }
    }

    /// Candidates (relative to `dest_path`) whose destination exists, in
    /// input order.
    pub async fn check(
        &self,
        dst: &dyn StorageAdapter,
        dest_path: &str,
        candidates: &[String],
    ) -> TransferResult<Vec<String>> {
        Ok(self
            .details(dst, dest_path, candidates)
            .await?
            .into_iter()
            .map(|conflict| conflict.path)
            .collect())
    }

    /// Like [`check`](Self::check), with the existing entry's size and
    /// modification time.
    #[tracing::instrument(skip(self, dst, candidates), fields(location_id = %dst.location_id(), candidates = candidates.len()))]
    pub async fn details(
        &self,
        dst: &dyn StorageAdapter,
        dest_path: &str,
        candidates: &[String],
    ) -> TransferResult<Vec<TransferConflict>> {
        let checks = candidates.iter().map(|candidate| async move {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|_| TransferError::QueueClosed)?;
            let target = join_path(dest_path, candidate);
            match dst.stat(&target).await {
                Ok(entry) => Ok(Some(TransferConflict {
                    path: candidate.clone(),
                    existing_size: entry.size,
                    existing_modified_at: entry.modified_at,
                })),
                Err(StorageError::NotFound(_)) => Ok(None),
                Err(e) => Err(TransferError::from(e)),
            }
        });

        let conflicts: Vec<TransferConflict> =
            try_join_all(checks).await?.into_iter().flatten().collect();

        tracing::debug!(conflicts = conflicts.len(), "Conflict check complete");
        Ok(conflicts)
    }
}

/// Join a location-relative directory and a relative name. Validation happens
/// in the adapter.
pub(crate) fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        dir.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}
