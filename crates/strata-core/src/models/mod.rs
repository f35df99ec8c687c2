pub mod file;
pub mod location;
pub mod transfer;

pub use file::{FileEntry, FileListing, FileType, Pagination};
pub use location::{LocationKind, LocationRef, StorageLocation};
pub use transfer::{
    ConflictPolicy, FileStatus, JobStatus, ProgressEvent, TransferConflict, TransferEndpoint,
    TransferEvent, TransferFileJob, TransferJob, TransferRequest,
};
