//! Strata transfer engine
//!
//! Moves files between any two storage locations:
//!
//! - [`ConflictDetector`] reports destination paths that already exist.
//! - [`TransferExecutor`] copies one file in fixed-size chunks, honoring a
//!   conflict policy and a cancellation token.
//! - [`TransferQueue`] owns the job table and runs file copies under a global
//!   concurrency bound shared with conflict checks.
//! - [`ProgressBroadcaster`] delivers each job's events to its subscriber.

pub mod conflict;
pub mod error;
pub mod executor;
pub mod progress;
pub mod queue;

#[cfg(test)]
pub(crate) mod testing;

pub use conflict::ConflictDetector;
pub use error::TransferError;
pub use executor::{renamed_path, CopyOutcome, CopyProgress, TransferExecutor};
pub use progress::{ProgressBroadcaster, ProgressStream};
pub use queue::{TransferQueue, TransferQueueConfig, PROGRESS_EMIT_BYTES};
