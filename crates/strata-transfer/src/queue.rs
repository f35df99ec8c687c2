//! Transfer job queue: job table, FIFO dispatch under a global concurrency
//! bound, cancellation, and eviction of finished jobs.
//!
//! Shutdown: dropping the [`TransferQueue`] stops the dispatcher and the
//! sweeper. File copies already running finish on their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::try_join_all;
use strata_core::models::{
    FileStatus, JobStatus, ProgressEvent, TransferEvent, TransferFileJob, TransferJob,
    TransferRequest,
};
use strata_core::Config;
use strata_storage::path::normalize;
use strata_storage::{StorageAdapter, StorageError};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::conflict::{join_path, ConflictDetector};
use crate::error::{TransferError, TransferResult};
use crate::executor::{CopyOutcome, CopyProgress, TransferExecutor};
use crate::progress::{ProgressBroadcaster, ProgressStream};

/// Byte progress is published at most once per this many bytes per file.
pub const PROGRESS_EMIT_BYTES: u64 = 256 * 1024;

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug)]
pub struct TransferQueueConfig {
    pub max_concurrent_transfers: usize,
    /// Cancel a job's remaining files after its first file error.
    pub fail_fast: bool,
    /// How long a finished job stays queryable.
    pub job_retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for TransferQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 2,
            fail_fast: false,
            job_retention: Duration::from_secs(3600),
            sweep_interval: MAX_SWEEP_INTERVAL,
        }
    }
}

impl TransferQueueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_transfers: config.max_concurrent_transfers.max(1),
            fail_fast: config.transfer_fail_fast,
            job_retention: config.transfer_job_retention,
            sweep_interval: config
                .transfer_job_retention
                .clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL),
        }
    }
}

struct JobEntry {
    job: TransferJob,
    cancel: CancellationToken,
    cancelled_by_user: bool,
}

struct FileTask {
    job_id: Uuid,
    index: usize,
    src: Arc<dyn StorageAdapter>,
    dst: Arc<dyn StorageAdapter>,
    cancel: CancellationToken,
}

struct QueueInner {
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
    broadcaster: Arc<ProgressBroadcaster>,
    executor: TransferExecutor,
    semaphore: Arc<Semaphore>,
    config: TransferQueueConfig,
}

pub struct TransferQueue {
    inner: Arc<QueueInner>,
    task_tx: mpsc::UnboundedSender<FileTask>,
    shutdown: CancellationToken,
}

impl TransferQueue {
    /// Create the queue and spawn its dispatcher and sweeper. Must be called
    /// inside a Tokio runtime.
    pub fn new(config: TransferQueueConfig) -> Self {
        Self::with_executor(config, TransferExecutor::default())
    }

    pub fn with_executor(config: TransferQueueConfig, executor: TransferExecutor) -> Self {
        let inner = Arc::new(QueueInner {
            jobs: Mutex::new(HashMap::new()),
            broadcaster: Arc::new(ProgressBroadcaster::new()),
            executor,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_transfers.max(1))),
            config,
        });
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tracing::info!(
            max_concurrent_transfers = inner.config.max_concurrent_transfers,
            fail_fast = inner.config.fail_fast,
            job_retention_secs = inner.config.job_retention.as_secs(),
            "Transfer queue started"
        );

        tokio::spawn(Self::dispatcher(inner.clone(), task_rx, shutdown.clone()));
        tokio::spawn(Self::sweeper(inner.clone(), shutdown.clone()));

        Self {
            inner,
            task_tx,
            shutdown,
        }
    }

    /// Conflict detector sharing this queue's concurrency bound.
    pub fn conflict_detector(&self) -> ConflictDetector {
        ConflictDetector::new(self.inner.semaphore.clone())
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.inner.broadcaster
    }

    pub fn subscribe(&self, job_id: Uuid) -> TransferResult<ProgressStream> {
        self.inner.broadcaster.subscribe(job_id)
    }

    /// Create a job for `request` and queue its files in request order.
    /// Directory entries are expanded into the files they contain.
    #[tracing::instrument(
        skip(self, request, src, dst),
        fields(
            source = %request.source.location_id,
            destination = %request.destination.location_id,
            requested = request.files.len()
        )
    )]
    pub async fn enqueue(
        &self,
        request: &TransferRequest,
        src: Arc<dyn StorageAdapter>,
        dst: Arc<dyn StorageAdapter>,
    ) -> TransferResult<Uuid> {
        if request.files.is_empty() {
            return Err(TransferError::InvalidRequest(
                "no files to transfer".to_string(),
            ));
        }

        let source_base = normalize(&request.source.path)?;
        let dest_base = normalize(&request.destination.path)?;

        let mut names = Vec::with_capacity(request.files.len());
        for name in &request.files {
            let name = normalize(name)?;
            if name.is_empty() {
                return Err(TransferError::InvalidRequest(
                    "file names must not be empty".to_string(),
                ));
            }
            names.push(name);
        }

        // Entries are expanded concurrently, each walk holding a transfer
        // permit; results keep request order.
        let expansions = names.iter().map(|name| {
            let src = &src;
            let source_base = &source_base;
            let dest_base = &dest_base;
            async move {
                let _permit = self
                    .inner
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| TransferError::QueueClosed)?;
                let source_path = join_path(source_base, name);
                match src.walk_files(&source_path).await {
                    Ok(entries) => Ok(entries
                        .into_iter()
                        .map(|entry| {
                            let suffix = strip_base(&entry.path, source_base);
                            let dest_path = join_path(dest_base, suffix);
                            TransferFileJob::new(entry.path, dest_path)
                        })
                        .collect::<Vec<_>>()),
                    Err(e @ StorageError::Security(_)) => Err(TransferError::from(e)),
                    Err(e) => {
                        // Let the copy itself report the failure on this file.
                        tracing::debug!(error = %e, path = %source_path, "Could not expand entry");
                        Ok(vec![TransferFileJob::new(
                            source_path,
                            join_path(dest_base, name),
                        )])
                    }
                }
            }
        });
        let files: Vec<TransferFileJob> = try_join_all(expansions)
            .await?
            .into_iter()
            .flatten()
            .collect();

        if files.is_empty() {
            return Err(TransferError::InvalidRequest(
                "the selected directories contain no files".to_string(),
            ));
        }

        let job_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let file_count = files.len();
        let job = TransferJob {
            id: job_id,
            source_location_id: request.source.location_id.clone(),
            dest_location_id: request.destination.location_id.clone(),
            source_path: source_base,
            dest_path: dest_base,
            conflict_policy: request.conflict_resolution,
            files,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            finished_at: None,
        };

        self.inner.broadcaster.register(job_id);
        self.inner.jobs().insert(
            job_id,
            JobEntry {
                job,
                cancel: cancel.clone(),
                cancelled_by_user: false,
            },
        );

        for index in 0..file_count {
            let task = FileTask {
                job_id,
                index,
                src: src.clone(),
                dst: dst.clone(),
                cancel: cancel.clone(),
            };
            if self.task_tx.send(task).is_err() {
                self.inner.jobs().remove(&job_id);
                self.inner.broadcaster.remove(job_id);
                return Err(TransferError::QueueClosed);
            }
        }

        tracing::info!(
            job_id = %job_id,
            files = file_count,
            policy = ?request.conflict_resolution,
            "Transfer job queued"
        );
        Ok(job_id)
    }

    /// Cancel a running job. Files not yet started become `Cancelled`;
    /// completed files stay. Returns `false` if the job had already finished.
    pub fn cancel(&self, job_id: Uuid) -> TransferResult<bool> {
        let mut jobs = self.inner.jobs();
        let entry = jobs
            .get_mut(&job_id)
            .ok_or(TransferError::JobNotFound(job_id))?;
        if entry.job.status.is_terminal() {
            return Ok(false);
        }
        entry.cancelled_by_user = true;
        entry.cancel.cancel();
        let events = cancel_queued_files(&mut entry.job);
        let finished = QueueInner::try_finish(entry);
        self.inner.publish_all(job_id, events, finished);
        drop(jobs);

        tracing::info!(job_id = %job_id, "Transfer job cancelled");
        Ok(true)
    }

    /// Snapshot of a job.
    pub fn get(&self, job_id: Uuid) -> Option<TransferJob> {
        self.inner.jobs().get(&job_id).map(|entry| entry.job.clone())
    }

    /// Evict a finished job. Returns `false` if the job is still running.
    pub fn acknowledge(&self, job_id: Uuid) -> TransferResult<bool> {
        let mut jobs = self.inner.jobs();
        let entry = jobs
            .get(&job_id)
            .ok_or(TransferError::JobNotFound(job_id))?;
        if !entry.job.status.is_terminal() {
            return Ok(false);
        }
        jobs.remove(&job_id);
        drop(jobs);
        self.inner.broadcaster.remove(job_id);
        tracing::debug!(job_id = %job_id, "Transfer job acknowledged");
        Ok(true)
    }

    async fn dispatcher(
        inner: Arc<QueueInner>,
        mut task_rx: mpsc::UnboundedReceiver<FileTask>,
        shutdown: CancellationToken,
    ) {
        loop {
            let task = tokio::select! {
                _ = shutdown.cancelled() => break,
                task = task_rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            // Files of a cancelled job were already marked by the cancel path.
            if task.cancel.is_cancelled() {
                continue;
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = inner.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let inner = inner.clone();
            tokio::spawn(async move {
                inner.run_file(task, permit).await;
            });
        }
        tracing::info!("Transfer dispatcher stopped");
    }

    async fn sweeper(inner: Arc<QueueInner>, shutdown: CancellationToken) {
        let mut interval =
            tokio::time::interval(inner.config.sweep_interval.max(MIN_SWEEP_INTERVAL));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => inner.evict_expired(),
            }
        }
    }
}

impl Drop for TransferQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl QueueInner {
    fn jobs(&self) -> MutexGuard<'_, HashMap<Uuid, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a job's events. Callers hold the job table lock, so events
    /// reach the channel in the order the job changed and nothing can follow
    /// `Finished`.
    fn publish_all(&self, job_id: Uuid, events: Vec<ProgressEvent>, finished: Option<JobStatus>) {
        for event in events {
            self.broadcaster.publish(job_id, TransferEvent::Progress(event));
        }
        if let Some(status) = finished {
            self.broadcaster
                .publish(job_id, TransferEvent::Finished { job_id, status });
        }
    }

    /// Mark the job terminal once every file has settled. Returns the final
    /// status the first time only.
    fn try_finish(entry: &mut JobEntry) -> Option<JobStatus> {
        if entry.job.status.is_terminal() || !entry.job.all_files_terminal() {
            return None;
        }
        let status = entry.job.terminal_status(entry.cancelled_by_user);
        entry.job.status = status;
        entry.job.finished_at = Some(Utc::now());
        tracing::info!(
            job_id = %entry.job.id,
            status = ?status,
            files = entry.job.files.len(),
            "Transfer job finished"
        );
        Some(status)
    }

    /// Update one file under the lock, publishing its event if `emit`.
    fn update_file<F>(&self, job_id: Uuid, index: usize, emit: bool, f: F)
    where
        F: FnOnce(&mut JobEntry, usize),
    {
        let mut jobs = self.jobs();
        let Some(entry) = jobs.get_mut(&job_id) else {
            return;
        };
        if index >= entry.job.files.len() {
            return;
        }
        f(entry, index);
        if emit {
            let event = ProgressEvent::for_file(job_id, &entry.job.files[index]);
            self.publish_all(job_id, vec![event], None);
        }
    }

    #[tracing::instrument(skip(self, task, _permit), fields(job_id = %task.job_id, file_index = task.index))]
    async fn run_file(&self, task: FileTask, _permit: OwnedSemaphorePermit) {
        let FileTask {
            job_id,
            index,
            src,
            dst,
            cancel,
        } = task;

        let start = {
            let mut jobs = self.jobs();
            let Some(entry) = jobs.get_mut(&job_id) else {
                return;
            };
            let file = &mut entry.job.files[index];
            if file.status != FileStatus::Queued {
                return;
            }
            file.status = FileStatus::Transferring;
            let started = ProgressEvent::for_file(job_id, file);
            let start = (
                file.source_path.clone(),
                file.dest_path.clone(),
                entry.job.conflict_policy,
            );
            if entry.job.status == JobStatus::Queued {
                entry.job.status = JobStatus::Active;
            }
            self.publish_all(job_id, vec![started], None);
            start
        };
        let (source_path, dest_path, policy) = start;

        let mut last_emitted = 0u64;
        let mut on_progress = |progress: CopyProgress| match progress {
            CopyProgress::Started { dest_path, total } => {
                self.update_file(job_id, index, true, |entry, i| {
                    let file = &mut entry.job.files[i];
                    file.dest_path = dest_path;
                    file.size = total;
                });
            }
            CopyProgress::Bytes(bytes) => {
                let emit = bytes - last_emitted >= PROGRESS_EMIT_BYTES;
                if emit {
                    last_emitted = bytes;
                }
                self.update_file(job_id, index, emit, |entry, i| {
                    entry.job.files[i].bytes_transferred = bytes;
                });
            }
        };

        let result = self
            .executor
            .copy(
                &*src,
                &source_path,
                &*dst,
                &dest_path,
                policy,
                &mut on_progress,
                &cancel,
            )
            .await;

        let fail_fast = self.config.fail_fast;
        let mut jobs = self.jobs();
        let Some(entry) = jobs.get_mut(&job_id) else {
            return;
        };
        let mut events = Vec::new();
        {
            let file = &mut entry.job.files[index];
            match result {
                Ok(CopyOutcome::Copied { dest_path, bytes }) => {
                    file.status = FileStatus::Completed;
                    file.dest_path = dest_path;
                    file.bytes_transferred = bytes;
                }
                Ok(CopyOutcome::Skipped { dest_path }) => {
                    file.status = FileStatus::Skipped;
                    file.dest_path = dest_path;
                }
                Err(TransferError::Cancelled) => {
                    file.status = FileStatus::Cancelled;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        source_path = %file.source_path,
                        dest_path = %file.dest_path,
                        "File transfer failed"
                    );
                    file.status = FileStatus::Error;
                    file.error = Some(e.to_string());
                }
            }
            events.push(ProgressEvent::for_file(job_id, file));
        }

        if fail_fast
            && entry.job.files[index].status == FileStatus::Error
            && !entry.cancel.is_cancelled()
        {
            tracing::info!(job_id = %job_id, "Fail-fast: cancelling remaining files");
            entry.cancel.cancel();
            events.extend(cancel_queued_files(&mut entry.job));
        }
        let finished = Self::try_finish(entry);
        self.publish_all(job_id, events, finished);
    }

    fn evict_expired(&self) {
        let retention = chrono::Duration::from_std(self.config.job_retention)
            .unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let expired: Vec<Uuid> = {
            let mut jobs = self.jobs();
            let expired: Vec<Uuid> = jobs
                .values()
                .filter(|entry| {
                    entry
                        .job
                        .finished_at
                        .is_some_and(|finished| now - finished >= retention)
                })
                .map(|entry| entry.job.id)
                .collect();
            for id in &expired {
                jobs.remove(id);
            }
            expired
        };
        for id in &expired {
            self.broadcaster.remove(*id);
        }
        if !expired.is_empty() {
            tracing::debug!(evicted = expired.len(), "Evicted finished transfer jobs");
        }
    }
}

/// Mark every not-yet-started file cancelled; returns their events.
fn cancel_queued_files(job: &mut TransferJob) -> Vec<ProgressEvent> {
    let job_id = job.id;
    job.files
        .iter_mut()
        .filter(|file| file.status == FileStatus::Queued)
        .map(|file| {
            file.status = FileStatus::Cancelled;
            ProgressEvent::for_file(job_id, file)
        })
        .collect()
}

/// Path of an expanded entry relative to the request's source directory.
fn strip_base<'a>(path: &'a str, base: &str) -> &'a str {
    if base.is_empty() {
        return path;
    }
    path.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        local_adapters, memory_adapter, read_to_vec, write_bytes, SlowAdapter,
    };
    use futures::StreamExt;
    use strata_core::models::{ConflictPolicy, TransferEndpoint};
    use tempfile::tempdir;

    fn request(
        source: (&str, &str),
        destination: (&str, &str),
        files: &[&str],
        policy: ConflictPolicy,
    ) -> TransferRequest {
        TransferRequest {
            source: TransferEndpoint {
                location_id: source.0.to_string(),
                path: source.1.to_string(),
            },
            destination: TransferEndpoint {
                location_id: destination.0.to_string(),
                path: destination.1.to_string(),
            },
            files: files.iter().map(|f| f.to_string()).collect(),
            conflict_resolution: policy,
        }
    }

    fn queue_with(max_concurrent_transfers: usize, fail_fast: bool) -> TransferQueue {
        TransferQueue::new(TransferQueueConfig {
            max_concurrent_transfers,
            fail_fast,
            ..Default::default()
        })
    }

    async fn drain(stream: ProgressStream) -> Vec<TransferEvent> {
        tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
            .await
            .expect("job did not finish in time")
    }

    fn final_status(events: &[TransferEvent]) -> Option<JobStatus> {
        match events.last() {
            Some(TransferEvent::Finished { status, .. }) => Some(*status),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_rename_scenario_local_to_s3() {
        let dir = tempdir().unwrap();
        let src = local_adapters(&[dir.path()]).remove(0);
        let dst = memory_adapter("my-bucket");
        write_bytes(&*src, "models/a.bin", b"weights-v2").await;
        write_bytes(&*dst, "imported/a.bin", b"weights-v1").await;

        let queue = queue_with(2, false);
        let job_id = queue
            .enqueue(
                &request(
                    ("local-0", "models"),
                    ("s3:my-bucket", "imported"),
                    &["a.bin"],
                    ConflictPolicy::Rename,
                ),
                src.clone(),
                dst.clone(),
            )
            .await
            .unwrap();

        let events = drain(queue.subscribe(job_id).unwrap()).await;
        assert_eq!(final_status(&events), Some(JobStatus::Completed));

        let job = queue.get(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.finished_at.is_some());
        assert_eq!(job.files[0].dest_path, "imported/a-1.bin");
        assert_eq!(job.files[0].status, FileStatus::Completed);
        assert_eq!(job.files[0].bytes_transferred, 10);

        assert_eq!(read_to_vec(&*dst, "imported/a-1.bin").await, b"weights-v2");
        assert_eq!(read_to_vec(&*dst, "imported/a.bin").await, b"weights-v1");
        assert_eq!(read_to_vec(&*src, "models/a.bin").await, b"weights-v2");
    }

    #[tokio::test]
    async fn test_concurrency_bound_under_oversubscription() {
        let src = memory_adapter("source");
        let slow = Arc::new(SlowAdapter::new(
            memory_adapter("dest"),
            Duration::from_millis(10),
        ));
        let dst: Arc<dyn StorageAdapter> = slow.clone();
        for job in 0..3 {
            for file in 0..7 {
                write_bytes(&*src, &format!("job{}/f{}.bin", job, file), b"payload").await;
            }
        }

        let queue = queue_with(2, false);
        let mut streams = Vec::new();
        for job in 0..3 {
            let files: Vec<String> = (0..7).map(|f| format!("f{}.bin", f)).collect();
            let files: Vec<&str> = files.iter().map(String::as_str).collect();
            let job_id = queue
                .enqueue(
                    &request(
                        ("s3:source", &format!("job{}", job)),
                        ("s3:dest", &format!("out{}", job)),
                        &files,
                        ConflictPolicy::Overwrite,
                    ),
                    src.clone(),
                    dst.clone(),
                )
                .await
                .unwrap();
            streams.push(queue.subscribe(job_id).unwrap());
        }

        for stream in streams {
            let events = drain(stream).await;
            assert_eq!(final_status(&events), Some(JobStatus::Completed));
        }
        assert_eq!(slow.peak(), 2);
    }

    #[tokio::test]
    async fn test_cancel_keeps_completed_files_and_removes_partial_output() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let locals = local_adapters(&[src_dir.path(), dst_dir.path()]);
        let src = locals[0].clone();
        let dst: Arc<dyn StorageAdapter> = Arc::new(SlowAdapter::new(
            locals[1].clone(),
            Duration::from_millis(40),
        ));
        let names = ["f0.bin", "f1.bin", "f2.bin", "f3.bin", "f4.bin"];
        for name in names {
            write_bytes(&*src, name, b"0123456789").await;
        }

        let queue = queue_with(1, false);
        let job_id = queue
            .enqueue(
                &request(("local-0", ""), ("local-1", "out"), &names, ConflictPolicy::Overwrite),
                src,
                dst,
            )
            .await
            .unwrap();

        let mut stream = queue.subscribe(job_id).unwrap();
        let mut completed_events = 0;
        while let Some(event) = stream.next().await {
            if let TransferEvent::Progress(progress) = &event {
                if progress.status == FileStatus::Completed {
                    completed_events += 1;
                    if completed_events == 2 {
                        break;
                    }
                }
            }
        }
        assert!(queue.cancel(job_id).unwrap());
        let rest = drain(stream).await;
        assert_eq!(final_status(&rest), Some(JobStatus::Cancelled));

        let job = queue.get(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        let completed: Vec<_> = job
            .files
            .iter()
            .filter(|f| f.status == FileStatus::Completed)
            .collect();
        let cancelled = job
            .files
            .iter()
            .filter(|f| f.status == FileStatus::Cancelled)
            .count();
        assert!(completed.len() >= 2);
        assert_eq!(completed.len() + cancelled, names.len());

        for file in &job.files {
            let on_disk = dst_dir.path().join(&file.dest_path).exists();
            assert_eq!(
                on_disk,
                file.status == FileStatus::Completed,
                "unexpected destination state for {}",
                file.dest_path
            );
        }

        assert!(!queue.cancel(job_id).unwrap());
    }

    #[tokio::test]
    async fn test_deleted_root_fails_files_without_affecting_other_jobs() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let doomed = src_dir.path().join("volume");
        std::fs::create_dir(&doomed).unwrap();
        let locals = local_adapters(&[&doomed, dst_dir.path()]);
        write_bytes(&*locals[0], "x.bin", b"x").await;
        write_bytes(&*locals[0], "y.bin", b"y").await;
        let bucket = memory_adapter("healthy");
        write_bytes(&*bucket, "z.bin", b"z").await;

        std::fs::remove_dir_all(&doomed).unwrap();

        let queue = queue_with(2, false);
        let broken = queue
            .enqueue(
                &request(
                    ("local-0", ""),
                    ("local-1", "out"),
                    &["x.bin", "y.bin"],
                    ConflictPolicy::Overwrite,
                ),
                locals[0].clone(),
                locals[1].clone(),
            )
            .await
            .unwrap();
        let healthy = queue
            .enqueue(
                &request(
                    ("s3:healthy", ""),
                    ("local-1", "other"),
                    &["z.bin"],
                    ConflictPolicy::Overwrite,
                ),
                bucket,
                locals[1].clone(),
            )
            .await
            .unwrap();

        let broken_events = drain(queue.subscribe(broken).unwrap()).await;
        let healthy_events = drain(queue.subscribe(healthy).unwrap()).await;
        assert_eq!(final_status(&broken_events), Some(JobStatus::Failed));
        assert_eq!(final_status(&healthy_events), Some(JobStatus::Completed));

        let job = queue.get(broken).unwrap();
        for file in &job.files {
            assert_eq!(file.status, FileStatus::Error);
            assert!(file.error.as_deref().unwrap_or("").starts_with("Not found"));
        }
        assert!(dst_dir.path().join("other/z.bin").exists());
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_remaining_files() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let locals = local_adapters(&[src_dir.path(), dst_dir.path()]);
        write_bytes(&*locals[0], "a.bin", b"a").await;
        write_bytes(&*locals[0], "b.bin", b"b").await;

        let queue = queue_with(1, true);
        let job_id = queue
            .enqueue(
                &request(
                    ("local-0", ""),
                    ("local-1", ""),
                    &["missing.bin", "a.bin", "b.bin"],
                    ConflictPolicy::Overwrite,
                ),
                locals[0].clone(),
                locals[1].clone(),
            )
            .await
            .unwrap();

        let events = drain(queue.subscribe(job_id).unwrap()).await;
        assert_eq!(final_status(&events), Some(JobStatus::Failed));
        let statuses: Vec<_> = queue
            .get(job_id)
            .unwrap()
            .files
            .iter()
            .map(|f| f.status)
            .collect();
        assert_eq!(
            statuses,
            vec![FileStatus::Error, FileStatus::Cancelled, FileStatus::Cancelled]
        );
    }

    #[tokio::test]
    async fn test_directory_entries_are_expanded() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        let locals = local_adapters(&[src_dir.path(), dst_dir.path()]);
        write_bytes(&*locals[0], "data/models/a.bin", b"a").await;
        write_bytes(&*locals[0], "data/models/sub/b.bin", b"bb").await;
        write_bytes(&*locals[0], "data/readme.md", b"r").await;

        let queue = queue_with(2, false);
        let job_id = queue
            .enqueue(
                &request(
                    ("local-0", "data"),
                    ("local-1", "backup"),
                    &["models", "readme.md"],
                    ConflictPolicy::Skip,
                ),
                locals[0].clone(),
                locals[1].clone(),
            )
            .await
            .unwrap();

        let job = queue.get(job_id).unwrap();
        let pairs: Vec<_> = job
            .files
            .iter()
            .map(|f| (f.source_path.as_str(), f.dest_path.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("data/models/a.bin", "backup/models/a.bin"),
                ("data/models/sub/b.bin", "backup/models/sub/b.bin"),
                ("data/readme.md", "backup/readme.md"),
            ]
        );

        let events = drain(queue.subscribe(job_id).unwrap()).await;
        assert_eq!(final_status(&events), Some(JobStatus::Completed));
        assert!(dst_dir.path().join("backup/models/sub/b.bin").exists());
    }

    #[tokio::test]
    async fn test_skip_policy_reports_skipped_and_completes() {
        let src = memory_adapter("source");
        let dst = memory_adapter("dest");
        write_bytes(&*src, "a.bin", b"new").await;
        write_bytes(&*dst, "a.bin", b"old").await;

        let queue = queue_with(2, false);
        let job_id = queue
            .enqueue(
                &request(("s3:source", ""), ("s3:dest", ""), &["a.bin"], ConflictPolicy::Skip),
                src,
                dst.clone(),
            )
            .await
            .unwrap();
        let events = drain(queue.subscribe(job_id).unwrap()).await;
        assert_eq!(final_status(&events), Some(JobStatus::Completed));
        assert_eq!(queue.get(job_id).unwrap().files[0].status, FileStatus::Skipped);
        assert_eq!(read_to_vec(&*dst, "a.bin").await, b"old");
    }

    #[tokio::test]
    async fn test_enqueue_rejects_traversal_and_empty_requests() {
        let src = memory_adapter("source");
        let dst = memory_adapter("dest");
        let queue = queue_with(2, false);

        let err = queue
            .enqueue(
                &request(("s3:source", ""), ("s3:dest", ""), &["../x"], ConflictPolicy::Skip),
                src.clone(),
                dst.clone(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Storage(StorageError::Security(_))));

        let err = queue
            .enqueue(
                &request(("s3:source", ""), ("s3:dest", "%2e%2e"), &["a"], ConflictPolicy::Skip),
                src.clone(),
                dst.clone(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Storage(StorageError::Security(_))));

        let err = queue
            .enqueue(
                &request(("s3:source", ""), ("s3:dest", ""), &[], ConflictPolicy::Skip),
                src,
                dst,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_acknowledge_and_retention_eviction() {
        let src = memory_adapter("source");
        let dst = memory_adapter("dest");
        write_bytes(&*src, "a.bin", b"a").await;
        let req = request(("s3:source", ""), ("s3:dest", ""), &["a.bin"], ConflictPolicy::Overwrite);

        let queue = queue_with(2, false);
        let job_id = queue.enqueue(&req, src.clone(), dst.clone()).await.unwrap();
        drain(queue.subscribe(job_id).unwrap()).await;
        assert!(queue.acknowledge(job_id).unwrap());
        assert!(queue.get(job_id).is_none());
        assert!(matches!(
            queue.acknowledge(job_id),
            Err(TransferError::JobNotFound(_))
        ));

        let short = TransferQueue::new(TransferQueueConfig {
            job_retention: Duration::from_millis(50),
            sweep_interval: Duration::from_millis(10),
            ..Default::default()
        });
        let job_id = short.enqueue(&req, src, dst).await.unwrap();
        drain(short.subscribe(job_id).unwrap()).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(short.get(job_id).is_none());
    }

    #[tokio::test]
    async fn test_entries_expand_concurrently_within_the_bound() {
        let memory = memory_adapter("source");
        for dir in 0..6 {
            write_bytes(&*memory, &format!("d{}/x.bin", dir), b"x").await;
        }
        let src = Arc::new(SlowAdapter::new(memory, Duration::from_millis(30)));
        let dst = memory_adapter("dest");

        let queue = queue_with(2, false);
        let names: Vec<String> = (0..6).map(|d| format!("d{}", d)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let job_id = queue
            .enqueue(
                &request(("s3:source", ""), ("s3:dest", "out"), &names, ConflictPolicy::Overwrite),
                src.clone(),
                dst,
            )
            .await
            .unwrap();

        assert_eq!(src.walk_peak(), 2);
        let sources: Vec<_> = queue
            .get(job_id)
            .unwrap()
            .files
            .into_iter()
            .map(|f| f.source_path)
            .collect();
        let expected: Vec<_> = (0..6).map(|d| format!("d{}/x.bin", d)).collect();
        assert_eq!(sources, expected);
        let events = drain(queue.subscribe(job_id).unwrap()).await;
        assert_eq!(final_status(&events), Some(JobStatus::Completed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_file_reports_before_finished_on_worker_threads() {
        let src = memory_adapter("source");
        let dst = memory_adapter("dest");
        let names: Vec<String> = (0..16).map(|f| format!("f{:02}.bin", f)).collect();
        for name in &names {
            write_bytes(&*src, name, b"x").await;
        }
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        let queue = queue_with(16, false);
        for round in 0..50 {
            let job_id = queue
                .enqueue(
                    &request(
                        ("s3:source", ""),
                        ("s3:dest", &format!("round{}", round)),
                        &names,
                        ConflictPolicy::Overwrite,
                    ),
                    src.clone(),
                    dst.clone(),
                )
                .await
                .unwrap();
            let events = drain(queue.subscribe(job_id).unwrap()).await;

            assert_eq!(
                final_status(&events),
                Some(JobStatus::Completed),
                "round {}",
                round
            );
            let finished = events.iter().filter(|e| e.is_finished()).count();
            assert_eq!(finished, 1, "round {}", round);
            for name in &names {
                let terminal = events
                    .iter()
                    .filter(|e| match e {
                        TransferEvent::Progress(p) => p.file == *name && p.status.is_terminal(),
                        _ => false,
                    })
                    .count();
                assert_eq!(terminal, 1, "round {}: {} terminal events", round, name);
            }
            assert!(queue.acknowledge(job_id).unwrap());
        }
    }
}
