//! Progress reporting types for batches.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::operation::{OperationError, OperationKind};

/// Live counters of one running batch.
///
/// Created when the batch starts and dropped when it terminates. Workers
/// publish into it with atomic increments; readers take [`ProgressSnapshot`]s.
#[derive(Debug)]
pub struct ProgressState {
    kind: OperationKind,
    total_units: u32,
    total_bytes: AtomicU64,
    total_known: AtomicBool,
    processed_bytes: AtomicU64,
    completed: AtomicU32,
    failed: AtomicU32,
    message: Mutex<CompactString>,
}

impl ProgressState {
    /// Create the state for a batch of `total_units` sources.
    pub fn new(kind: OperationKind, total_units: usize) -> Self {
        Self {
            kind,
            total_units: u32::try_from(total_units).unwrap_or(u32::MAX),
            total_bytes: AtomicU64::new(0),
            total_known: AtomicBool::new(false),
            processed_bytes: AtomicU64::new(0),
            completed: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            message: Mutex::new(CompactString::default()),
        }
    }

    /// Publish the progress denominator.
    pub fn set_total_bytes(&self, bytes: u64) {
        self.total_bytes.store(bytes, Ordering::Release);
        self.total_known.store(true, Ordering::Release);
    }

    /// Account bytes that have been durably processed.
    pub fn add_bytes(&self, bytes: u64) {
        if bytes > 0 {
            self.processed_bytes.fetch_add(bytes, Ordering::AcqRel);
        }
    }

    /// Record one source that finished successfully.
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    /// Record one source that failed.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
    }

    /// Replace the status message.
    pub fn set_message(&self, message: impl Into<CompactString>) {
        let mut guard = self
            .message
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = message.into();
    }

    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> u32 {
        self.failed.load(Ordering::Acquire)
    }

    /// Raw processed byte counter.
    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes.load(Ordering::Acquire)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Acquire)
    }

    /// Take an immutable copy of the counters.
    ///
    /// Once the total is known the reported processed bytes never exceed it,
    /// even if files grew between estimation and processing.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let total_bytes = self.total_bytes();
        let mut processed_bytes = self.processed_bytes();
        if self.total_known.load(Ordering::Acquire) {
            processed_bytes = processed_bytes.min(total_bytes);
        }

        let message = self
            .message
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        ProgressSnapshot {
            operation_kind: self.kind,
            processed_bytes,
            total_bytes,
            completed: self.completed(),
            failed: self.failed(),
            total_units: self.total_units,
            message,
        }
    }
}

/// Progress of a batch at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// The type of operation.
    pub operation_kind: OperationKind,
    /// Bytes processed so far.
    pub processed_bytes: u64,
    /// Total bytes to process (0 until estimation finished).
    pub total_bytes: u64,
    /// Sources finished successfully.
    pub completed: u32,
    /// Sources that failed.
    pub failed: u32,
    /// Sources in the batch.
    pub total_units: u32,
    /// Latest status message.
    pub message: CompactString,
}

impl ProgressSnapshot {
    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.processed_bytes as f64 / self.total_bytes as f64) * 100.0
        } else if self.total_units > 0 {
            ((self.completed + self.failed) as f64 / self.total_units as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Terminal state of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOutcome {
    /// Every source was processed.
    Succeeded,
    /// At least one source failed; the others were processed.
    PartiallyFailed,
    /// The caller cancelled before every source finished.
    Cancelled,
    /// The batch could not run at all.
    Failed(String),
}

impl std::fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "Succeeded"),
            Self::PartiallyFailed => write!(f, "Partially failed"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

/// Result of a finished batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// The type of operation.
    pub operation_kind: OperationKind,
    /// How the batch ended.
    pub outcome: BatchOutcome,
    /// Number of sources processed successfully.
    pub completed: u32,
    /// Number of sources that failed.
    pub failed: u32,
    /// Sources left out because of a skip-all conflict decision.
    pub skipped: u32,
    /// Bytes processed.
    pub processed_bytes: u64,
    /// Estimated bytes to process.
    pub total_bytes: u64,
    /// Errors that occurred, one per failed source.
    pub errors: Vec<OperationError>,
}

impl BatchReport {
    /// Check if the batch was fully successful.
    pub fn is_success(&self) -> bool {
        self.outcome == BatchOutcome::Succeeded
    }

    /// Get a human-readable summary of the batch.
    pub fn summary(&self) -> String {
        let action = self.operation_kind.past_tense();

        let mut summary = match &self.outcome {
            BatchOutcome::Failed(reason) => return format!("{} failed: {}", self.operation_kind, reason),
            BatchOutcome::Cancelled => format!(
                "{} cancelled after {} items",
                self.operation_kind, self.completed
            ),
            _ if self.failed == 0 => format!("{} {} items", action, self.completed),
            _ => format!("{} {} items, {} failed", action, self.completed, self.failed),
        };

        if self.skipped > 0 {
            summary.push_str(&format!(", {} skipped", self.skipped));
        }
        summary
    }
}

/// Event sent through a batch's channel.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// Progress update.
    Progress(ProgressSnapshot),
    /// The batch terminated.
    Complete(BatchReport),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let state = ProgressState::new(OperationKind::Copy, 3);
        state.set_total_bytes(100);
        state.add_bytes(40);
        state.record_completed();
        state.record_failed();
        state.set_message("Copying a.txt");

        let snapshot = state.snapshot();
        assert_eq!(snapshot.processed_bytes, 40);
        assert_eq!(snapshot.total_bytes, 100);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.total_units, 3);
        assert_eq!(snapshot.message, "Copying a.txt");
        assert!((snapshot.percentage() - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_never_exceeds_total() {
        let state = ProgressState::new(OperationKind::Copy, 1);
        state.set_total_bytes(10);
        state.add_bytes(15);

        assert_eq!(state.snapshot().processed_bytes, 10);
        assert_eq!(state.processed_bytes(), 15);
    }

    #[test]
    fn test_percentage_by_units_without_bytes() {
        let state = ProgressState::new(OperationKind::Delete, 4);
        state.record_completed();
        assert!((state.snapshot().percentage() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_report_summary() {
        let mut report = BatchReport {
            operation_kind: OperationKind::Copy,
            outcome: BatchOutcome::PartiallyFailed,
            completed: 2,
            failed: 1,
            skipped: 0,
            processed_bytes: 0,
            total_bytes: 0,
            errors: vec![],
        };
        assert_eq!(report.summary(), "Copied 2 items, 1 failed");
        assert!(!report.is_success());

        report.outcome = BatchOutcome::Succeeded;
        report.failed = 0;
        report.skipped = 2;
        assert_eq!(report.summary(), "Copied 2 items, 2 skipped");
    }
}
