//! Strata Storage Library
//!
//! One normalized interface over two kinds of storage: local filesystem roots
//! (mounted volumes) and S3-compatible buckets.
//!
//! # Paths
//!
//! Every path handed to an adapter is relative to its location root, uses `/`
//! as separator and has no leading slash. Callers never pass absolute paths:
//! [`PathValidator`] turns a user-supplied relative path into a validated
//! absolute path (local) or object key (S3), rejecting traversal, NUL bytes,
//! encoded or Unicode look-alike dot segments, drive prefixes, and symlinks
//! that leave the root.

pub mod error;
pub mod local;
pub mod path;
pub mod registry;
pub mod s3;
pub mod traits;

pub use error::{StorageError, StorageFailure, StorageResult};
pub use local::LocalStorage;
pub use path::PathValidator;
#[cfg(feature = "storage-s3")]
pub use registry::AwsBucketCatalog;
pub use registry::{BucketCatalog, LocationRegistry, StaticBucketCatalog};
pub use s3::S3Storage;
pub use strata_core::LocationKind;
pub use traits::{ByteSink, ByteStream, StorageAdapter, WriteMode, TRANSFER_CHUNK_SIZE};
