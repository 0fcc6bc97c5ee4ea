//! File operation types.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::Display;

/// The kind of operation applied to every source of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum OperationKind {
    Copy,
    Move,
    Delete,
    Extract,
}

impl OperationKind {
    /// Whether the operation writes into a target directory.
    pub fn needs_target(&self) -> bool {
        !matches!(self, Self::Delete)
    }

    /// Whether destination name collisions are checked before running.
    pub fn checks_conflicts(&self) -> bool {
        matches!(self, Self::Copy | Self::Move)
    }

    /// Past-tense verb used in summaries.
    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Copy => "Copied",
            Self::Move => "Moved",
            Self::Delete => "Deleted",
            Self::Extract => "Extracted",
        }
    }
}

/// A batch of work submitted by the caller. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    kind: OperationKind,
    sources: Vec<PathBuf>,
    target_dir: Option<PathBuf>,
}

impl OperationDescriptor {
    /// Create a descriptor.
    pub fn new(kind: OperationKind, sources: Vec<PathBuf>, target_dir: Option<PathBuf>) -> Self {
        Self {
            kind,
            sources,
            target_dir,
        }
    }

    /// Create a copy operation.
    pub fn copy(sources: Vec<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self::new(OperationKind::Copy, sources, Some(target_dir.into()))
    }

    /// Create a move operation.
    pub fn move_to(sources: Vec<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self::new(OperationKind::Move, sources, Some(target_dir.into()))
    }

    /// Create a delete operation.
    pub fn delete(sources: Vec<PathBuf>) -> Self {
        Self::new(OperationKind::Delete, sources, None)
    }

    /// Create an archive extraction.
    pub fn extract(archives: Vec<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self::new(OperationKind::Extract, archives, Some(target_dir.into()))
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn target_dir(&self) -> Option<&Path> {
        self.target_dir.as_deref()
    }
}

/// Where a single source lands inside the target directory.
///
/// Copy and move keep the source's base name; extraction unpacks straight
/// into the target directory.
pub fn unit_destination(kind: OperationKind, source: &Path, target_dir: &Path) -> PathBuf {
    match kind {
        OperationKind::Extract | OperationKind::Delete => target_dir.to_path_buf(),
        OperationKind::Copy | OperationKind::Move => {
            target_dir.join(source.file_name().unwrap_or(source.as_os_str()))
        }
    }
}

/// An error that occurred for one source of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationError {
    /// The path that caused the error.
    pub path: PathBuf,
    /// A human-readable error message.
    pub message: String,
}

impl OperationError {
    /// Create a new operation error.
    pub fn new(path: PathBuf, message: impl Into<String>) -> Self {
        Self {
            path,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}
