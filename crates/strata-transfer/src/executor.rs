//! Single-file copy between two storage adapters.

use bytes::Bytes;
use futures::StreamExt;
use strata_core::models::ConflictPolicy;
use strata_core::LocationKind;
use strata_storage::{ByteSink, StorageAdapter, StorageError, WriteMode, TRANSFER_CHUNK_SIZE};
use tokio_util::sync::CancellationToken;

use crate::error::{TransferError, TransferResult};

/// Upper bound on `name-N.ext` probes before giving up.
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// Result of one file copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied { dest_path: String, bytes: u64 },
    /// Destination existed and the policy was `skip`.
    Skipped { dest_path: String },
}

/// Progress callback payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyProgress {
    /// Conflict resolution is done; `dest_path` is final.
    Started { dest_path: String, total: u64 },
    /// Cumulative bytes written so far.
    Bytes(u64),
}

#[derive(Clone, Debug)]
pub struct TransferExecutor {
    chunk_size: usize,
}

impl Default for TransferExecutor {
    fn default() -> Self {
        Self {
            chunk_size: TRANSFER_CHUNK_SIZE,
        }
    }
}

impl TransferExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Copy `src_path` on `src` to `dst_path` on `dst`.
    ///
    /// On error or cancellation the destination sink is aborted before the
    /// error is returned, so no partial output remains.
    #[tracing::instrument(
        skip(self, src, dst, on_progress, cancel),
        fields(src = %src.location_id(), dst = %dst.location_id())
    )]
    pub async fn copy(
        &self,
        src: &dyn StorageAdapter,
        src_path: &str,
        dst: &dyn StorageAdapter,
        dst_path: &str,
        policy: ConflictPolicy,
        on_progress: &mut (dyn FnMut(CopyProgress) + Send),
        cancel: &CancellationToken,
    ) -> TransferResult<CopyOutcome> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let source = src.stat(src_path).await?;
        if source.is_dir() {
            return Err(TransferError::InvalidRequest(format!(
                "{} is a directory",
                src_path
            )));
        }

        let same_location = src.location_id() == dst.location_id();
        let dest_path = match policy {
            ConflictPolicy::Overwrite => {
                if same_location && src_path == dst_path {
                    return Err(TransferError::InvalidRequest(
                        "source and destination are the same file".to_string(),
                    ));
                }
                dst_path.to_string()
            }
            ConflictPolicy::Skip => {
                if dst.exists(dst_path).await? {
                    tracing::debug!(dest_path = %dst_path, "Destination exists, skipping");
                    return Ok(CopyOutcome::Skipped {
                        dest_path: dst_path.to_string(),
                    });
                }
                dst_path.to_string()
            }
            ConflictPolicy::Rename => available_path(dst, dst_path).await?,
        };

        let expected = source.size;
        on_progress(CopyProgress::Started {
            dest_path: dest_path.clone(),
            total: expected.unwrap_or(0),
        });

        if same_location
            && src.kind() == LocationKind::S3
            && dst.copy_within(src_path, &dest_path).await?
        {
            let bytes = expected.unwrap_or(0);
            on_progress(CopyProgress::Bytes(bytes));
            return Ok(CopyOutcome::Copied { dest_path, bytes });
        }

        // Skip and rename picked a free name; the write must not replace
        // whatever lands there in the meantime.
        let mode = match policy {
            ConflictPolicy::Overwrite => WriteMode::Overwrite,
            ConflictPolicy::Skip | ConflictPolicy::Rename => WriteMode::CreateNew,
        };
        let mut reader = src.open_read(src_path).await?;
        let mut sink = match dst.open_write(&dest_path, expected, mode).await {
            Ok(sink) => sink,
            Err(e) => return skipped_if_taken(e, policy, dest_path),
        };
        let mut written: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    abort_quietly(sink, &dest_path).await;
                    return Err(TransferError::Cancelled);
                }
                next = reader.next() => next,
            };

            let mut data = match next {
                None => break,
                Some(Ok(data)) => data,
                Some(Err(e)) => {
                    abort_quietly(sink, &dest_path).await;
                    return Err(e.into());
                }
            };

            while !data.is_empty() {
                let chunk: Bytes = data.split_to(self.chunk_size.min(data.len()));
                let len = chunk.len() as u64;
                if let Err(e) = sink.write(chunk).await {
                    abort_quietly(sink, &dest_path).await;
                    return Err(e.into());
                }
                written += len;
                on_progress(CopyProgress::Bytes(written));

                if cancel.is_cancelled() {
                    abort_quietly(sink, &dest_path).await;
                    return Err(TransferError::Cancelled);
                }
            }
        }

        if let Some(expected) = expected {
            if expected != written {
                abort_quietly(sink, &dest_path).await;
                return Err(TransferError::SizeMismatch {
                    expected,
                    actual: written,
                });
            }
        }

        let bytes = match sink.finish().await {
            Ok(bytes) => bytes,
            Err(e) => return skipped_if_taken(e, policy, dest_path),
        };
        tracing::debug!(dest_path = %dest_path, size_bytes = bytes, "File copied");
        Ok(CopyOutcome::Copied { dest_path, bytes })
    }
}

/// A destination that appeared after the conflict check counts as skipped
/// under the skip policy; anything else is a failure.
fn skipped_if_taken(
    err: StorageError,
    policy: ConflictPolicy,
    dest_path: String,
) -> TransferResult<CopyOutcome> {
    match err {
        StorageError::AlreadyExists(_) if policy == ConflictPolicy::Skip => {
            tracing::debug!(dest_path = %dest_path, "Destination appeared during copy, skipping");
            Ok(CopyOutcome::Skipped { dest_path })
        }
        other => Err(other.into()),
    }
}

async fn abort_quietly(sink: Box<dyn ByteSink>, dest_path: &str) {
    if let Err(e) = sink.abort().await {
        tracing::warn!(error = %e, dest_path = %dest_path, "Failed to clean up partial output");
    }
}

/// First of `path`, `name-1.ext`, `name-2.ext`, ... that does not exist.
async fn available_path(dst: &dyn StorageAdapter, path: &str) -> TransferResult<String> {
    if !dst.exists(path).await? {
        return Ok(path.to_string());
    }
    for n in 1..=MAX_RENAME_ATTEMPTS {
        let candidate = renamed_path(path, n);
        if !dst.exists(&candidate).await? {
            tracing::debug!(original = %path, renamed = %candidate, "Destination exists, renaming");
            return Ok(candidate);
        }
    }
    Err(TransferError::InvalidRequest(format!(
        "no free name found for {}",
        path
    )))
}

/// `dir/name.ext` → `dir/name-{n}.ext`. The suffix goes before the last
/// extension; dotfiles and names without an extension get it appended.
pub fn renamed_path(path: &str, n: u32) -> String {
    let (dir, name) = match path.rfind('/') {
        Some(idx) => (&path[..=idx], &path[idx + 1..]),
        None => ("", path),
    };
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}{}-{}{}", dir, &name[..dot], n, &name[dot..]),
        _ => format!("{}{}-{}", dir, name, n),
    }
}
