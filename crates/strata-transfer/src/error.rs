use strata_core::AppError;
use strata_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Size mismatch: expected {expected} bytes, copied {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Transfer job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Progress stream for job {0} already has a subscriber")]
    AlreadySubscribed(Uuid),

    #[error("Invalid transfer request: {0}")]
    InvalidRequest(String),

    #[error("Transfer queue is shut down")]
    QueueClosed,
}

pub type TransferResult<T> = Result<T, TransferError>;

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Storage(e) => e.into(),
            TransferError::Cancelled => AppError::Conflict(err.to_string()),
            TransferError::SizeMismatch { .. } => AppError::Storage(err.to_string()),
            TransferError::JobNotFound(_) => AppError::NotFound(err.to_string()),
            TransferError::AlreadySubscribed(_) => AppError::Conflict(err.to_string()),
            TransferError::InvalidRequest(msg) => AppError::InvalidInput(msg),
            TransferError::QueueClosed => AppError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::ErrorMetadata;

    #[test]
    fn test_transfer_error_status_codes() {
        let app: AppError = TransferError::JobNotFound(Uuid::nil()).into();
        assert_eq!(app.http_status_code(), 404);

        let app: AppError = TransferError::AlreadySubscribed(Uuid::nil()).into();
        assert_eq!(app.http_status_code(), 409);

        let app: AppError = TransferError::Storage(StorageError::Security("x".into())).into();
        assert_eq!(app.error_code(), "PATH_SECURITY_VIOLATION");

        let app: AppError = TransferError::InvalidRequest("no files".into()).into();
        assert_eq!(app.http_status_code(), 400);
    }
}
