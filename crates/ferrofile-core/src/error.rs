//! Error types for pools, batches and individual units of work.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the worker pools.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has been shut down, or shut down before the work started.
    #[error("{pool} pool is closed")]
    Closed { pool: &'static str },

    /// The submitted work panicked.
    #[error("Task on {pool} pool panicked")]
    Panicked { pool: &'static str },

    /// The pool's runtime could not be created.
    #[error("Failed to build {pool} pool: {source}")]
    Build {
        pool: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Pre-flight errors that reject a whole batch before anything is touched.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The operation needs a target directory but none was given.
    #[error("{kind} requires a target directory")]
    MissingTarget { kind: String },

    /// The target directory is the source directory or lies inside it.
    #[error("Cannot copy/move {} into itself ({})", source_dir.display(), target.display())]
    SelfContainment { source_dir: PathBuf, target: PathBuf },

    /// The destination is an existing non-directory.
    #[error("Target is not a directory: {}", path.display())]
    TargetNotADirectory { path: PathBuf },

    /// Conflicts were detected and no resolution policy was supplied.
    #[error("{count} conflict(s) need a resolution before the batch can start")]
    UnresolvedConflicts { count: usize },

    /// The caller chose to abort when presented with conflicts.
    #[error("Operation aborted")]
    Aborted,

    /// The batch could not be scheduled.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Failure of one unit of work (one source path).
#[derive(Debug, Error)]
pub enum UnitError {
    /// Permission denied for a path.
    #[error("Permission denied: {}", path.display())]
    AccessDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive format is not recognized from the file name.
    #[error("Unsupported archive format: {}", path.display())]
    UnsupportedArchive { path: PathBuf },

    /// The archive is corrupt or could not be read.
    #[error("Cannot read archive {}: {message}", path.display())]
    Archive { path: PathBuf, message: String },

    /// The unit could not run on its pool.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl UnitError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::AccessDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Create an archive error with path context.
    pub fn archive(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether this failure was caused by missing permissions.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_error_io() {
        let err = UnitError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.is_access_denied());

        let err = UnitError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, UnitError::NotFound { .. }));

        let err = UnitError::io("/test/path", std::io::Error::other("disk on fire"));
        assert!(matches!(err, UnitError::Io { .. }));
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn test_batch_error_messages() {
        let err = BatchError::SelfContainment {
            source_dir: PathBuf::from("/a"),
            target: PathBuf::from("/a/b"),
        };
        assert!(err.to_string().contains("into itself"));

        let err = BatchError::UnresolvedConflicts { count: 2 };
        assert!(err.to_string().starts_with("2 conflict"));
    }
}
