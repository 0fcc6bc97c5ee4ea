//! File operation engine for ferrofile.
//!
//! This crate runs copy, move, delete and extract batches on the shared I/O
//! pool, with conflict pre-scan, byte-accurate progress reporting via
//! channels, and cooperative cancellation.

mod archive;
mod batch;
mod conflict;
mod fs;
mod operation;
mod progress;
mod size;
mod unit;
mod walk;

pub use archive::ArchiveFormat;
pub use batch::{BatchCoordinator, BatchHandle, PreparedBatch};
pub use conflict::{check_self_containment, scan_conflicts, ConflictEntry, ConflictKind, ConflictPolicy};
pub use fs::{FileSystem, OsFileSystem};
pub use operation::{unit_destination, OperationDescriptor, OperationError, OperationKind};
pub use progress::{BatchEvent, BatchOutcome, BatchReport, ProgressSnapshot, ProgressState};
pub use size::{estimate_size, estimate_source, SizeEstimate};
pub use unit::{UnitContext, UnitOperation, UnitOutcome};
