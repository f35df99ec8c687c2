use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// What to do when a destination file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    Overwrite,
    #[default]
    Skip,
    Rename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Queued,
    Transferring,
    Completed,
    /// Destination existed and the job's policy was `skip`.
    Skipped,
    Cancelled,
    Error,
}

impl FileStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FileStatus::Queued | FileStatus::Transferring)
    }
}

/// A location plus a path relative to its root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferEndpoint {
    pub location_id: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub source: TransferEndpoint,
    pub destination: TransferEndpoint,
    /// Names relative to `source.path`; directories are expanded recursively.
    pub files: Vec<String>,
    #[serde(default)]
    pub conflict_resolution: ConflictPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferFileJob {
    pub source_path: String,
    /// Final destination path; differs from the requested one after a rename.
    pub dest_path: String,
    pub size: u64,
    pub bytes_transferred: u64,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferFileJob {
    pub fn new(source_path: String, dest_path: String) -> Self {
        Self {
            source_path,
            dest_path,
            size: 0,
            bytes_transferred: 0,
            status: FileStatus::Queued,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferJob {
    pub id: Uuid,
    pub source_location_id: String,
    pub dest_location_id: String,
    pub source_path: String,
    pub dest_path: String,
    pub conflict_policy: ConflictPolicy,
    pub files: Vec<TransferFileJob>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TransferJob {
    pub fn all_files_terminal(&self) -> bool {
        self.files.iter().all(|f| f.status.is_terminal())
    }

    /// Terminal status once every file has settled.
    ///
    /// An explicit cancel wins; otherwise any file error fails the job, and a
    /// job whose files were cancelled by fail-fast is still reported as failed.
    pub fn terminal_status(&self, cancelled_by_user: bool) -> JobStatus {
        if cancelled_by_user {
            JobStatus::Cancelled
        } else if self.files.iter().any(|f| f.status == FileStatus::Error) {
            JobStatus::Failed
        } else if self.files.iter().any(|f| f.status == FileStatus::Cancelled) {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        }
    }
}

/// Pre-flight conflict details for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferConflict {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_modified_at: Option<DateTime<Utc>>,
}

/// One file status change or progress tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: Uuid,
    /// Source path of the file
    pub file: String,
    pub dest_path: String,
    pub status: FileStatus,
    pub bytes_transferred: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn for_file(job_id: Uuid, file: &TransferFileJob) -> Self {
        Self {
            job_id,
            file: file.source_path.clone(),
            dest_path: file.dest_path.clone(),
            status: file.status,
            bytes_transferred: file.bytes_transferred,
            total: file.size,
            error: file.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum TransferEvent {
    Progress(ProgressEvent),
    #[serde(rename_all = "camelCase")]
    Finished { job_id: Uuid, status: JobStatus },
}

impl TransferEvent {
    pub fn is_finished(&self) -> bool {
        matches!(self, TransferEvent::Finished { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with(statuses: &[FileStatus]) -> TransferJob {
        TransferJob {
            id: Uuid::new_v4(),
            source_location_id: "local-0".to_string(),
            dest_location_id: "s3:bucket".to_string(),
            source_path: String::new(),
            dest_path: String::new(),
            conflict_policy: ConflictPolicy::Skip,
            files: statuses
                .iter()
                .map(|s| TransferFileJob {
                    status: *s,
                    ..TransferFileJob::new("a".to_string(), "a".to_string())
                })
                .collect(),
            status: JobStatus::Active,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    #[test]
    fn test_terminal_status() {
        let done = job_with(&[FileStatus::Completed, FileStatus::Skipped]);
        assert!(done.all_files_terminal());
        assert_eq!(done.terminal_status(false), JobStatus::Completed);

        let failed = job_with(&[FileStatus::Completed, FileStatus::Error]);
        assert_eq!(failed.terminal_status(false), JobStatus::Failed);

        let cancelled = job_with(&[FileStatus::Completed, FileStatus::Cancelled]);
        assert_eq!(cancelled.terminal_status(true), JobStatus::Cancelled);

        let running = job_with(&[FileStatus::Completed, FileStatus::Transferring]);
        assert!(!running.all_files_terminal());
    }

    #[test]
    fn test_conflict_policy_wire_format() {
        let policy: ConflictPolicy = serde_json::from_str("\"rename\"").unwrap();
        assert_eq!(policy, ConflictPolicy::Rename);
        let request: TransferRequest = serde_json::from_value(serde_json::json!({
            "source": {"locationId": "local-0", "path": "models"},
            "destination": {"locationId": "s3:my-bucket", "path": "imported"},
            "files": ["a.bin"]
        }))
        .unwrap();
        assert_eq!(request.conflict_resolution, ConflictPolicy::Skip);
    }

    #[test]
    fn test_finished_event_tag() {
        let event = TransferEvent::Finished {
            job_id: Uuid::nil(),
            status: JobStatus::Completed,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "finished");
        assert_eq!(json["status"], "completed");
        assert!(json.get("jobId").is_some());
    }
}
