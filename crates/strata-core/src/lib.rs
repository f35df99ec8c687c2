//! Strata Core Library
//!
//! This crate provides core domain models, error types, and configuration
//! that are shared across all Strata components.

pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{Config, S3Settings, SettingsHandle, StorageSettings};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::{LocationKind, LocationRef};
// Note: StorageError and the StorageAdapter trait live in strata-storage,
// TransferError in strata-transfer.
