//! Storage operation errors

use std::fmt;
use std::io;

use object_store::Error as ObjectStoreError;
use thiserror::Error;

/// Why a storage operation failed when the cause is the backend itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFailure {
    DiskFull,
    SizeLimitExceeded,
    Io,
}

impl fmt::Display for StorageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StorageFailure::DiskFull => "disk_full",
            StorageFailure::SizeLimitExceeded => "size_limit_exceeded",
            StorageFailure::Io => "io",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The path was rejected before touching storage.
    #[error("Path rejected: {0}")]
    Security(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage failure ({reason}): {message}")]
    Storage {
        reason: StorageFailure,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn io(message: impl Into<String>) -> Self {
        StorageError::Storage {
            reason: StorageFailure::Io,
            message: message.into(),
        }
    }

    pub fn size_limit(limit: u64) -> Self {
        StorageError::Storage {
            reason: StorageFailure::SizeLimitExceeded,
            message: format!("file exceeds the maximum size of {} bytes", limit),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Map an I/O error on `path` (location-relative) into a storage error.
    pub fn from_io(err: io::Error, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.to_string()),
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(path.to_string()),
            io::ErrorKind::StorageFull => StorageError::Storage {
                reason: StorageFailure::DiskFull,
                message: format!("no space left while writing {}", path),
            },
            _ => StorageError::io(format!("{}: {}", path, err)),
        }
    }

    /// Map an object store error for `key` into a storage error.
    pub fn from_object_store(err: ObjectStoreError, key: &str) -> Self {
        match err {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            ObjectStoreError::AlreadyExists { .. } => StorageError::AlreadyExists(key.to_string()),
            ObjectStoreError::PermissionDenied { .. } | ObjectStoreError::Unauthenticated { .. } => {
                StorageError::PermissionDenied(key.to_string())
            }
            other => StorageError::io(format!("{}: {}", key, other)),
        }
    }
}

impl From<StorageError> for strata_core::AppError {
    fn from(err: StorageError) -> Self {
        use strata_core::AppError;
        match err {
            StorageError::NotFound(path) => AppError::NotFound(format!("Not found: {}", path)),
            StorageError::PermissionDenied(path) => {
                AppError::PermissionDenied(format!("Permission denied: {}", path))
            }
            StorageError::Security(reason) => AppError::Security(reason),
            StorageError::AlreadyExists(path) => {
                AppError::Conflict(format!("Already exists: {}", path))
            }
            StorageError::Storage { reason, message } => match reason {
                StorageFailure::SizeLimitExceeded => AppError::PayloadTooLarge(message),
                StorageFailure::DiskFull => AppError::InsufficientStorage(message),
                StorageFailure::Io => AppError::Storage(message),
            },
            StorageError::Config(message) => AppError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{AppError, ErrorMetadata};

    #[test]
    fn test_io_error_mapping() {
        let err = StorageError::from_io(io::Error::from(io::ErrorKind::NotFound), "a/b.txt");
        assert!(err.is_not_found());

        let err = StorageError::from_io(
            io::Error::from(io::ErrorKind::PermissionDenied),
            "secret",
        );
        assert!(matches!(err, StorageError::PermissionDenied(_)));

        let err = StorageError::from_io(io::Error::from(io::ErrorKind::StorageFull), "big.bin");
        assert!(matches!(
            err,
            StorageError::Storage {
                reason: StorageFailure::DiskFull,
                ..
            }
        ));
    }

    #[test]
    fn test_app_error_status_codes() {
        let app: AppError = StorageError::size_limit(10).into();
        assert_eq!(app.http_status_code(), 413);

        let app: AppError = StorageError::Security("traversal".to_string()).into();
        assert_eq!(app.http_status_code(), 403);

        let app: AppError = StorageError::AlreadyExists("x".to_string()).into();
        assert_eq!(app.http_status_code(), 409);

        let app: AppError = StorageError::io("broken pipe").into();
        assert_eq!(app.http_status_code(), 500);
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(StorageFailure::SizeLimitExceeded.to_string(), "size_limit_exceeded");
        assert_eq!(StorageFailure::DiskFull.to_string(), "disk_full");
    }
}
