//! Pre-flight checks run before a batch mutates anything.

use std::path::{Path, PathBuf};

use ferrofile_core::BatchError;
use serde::{Deserialize, Serialize};

use crate::fs::FileSystem;
use crate::operation::{unit_destination, OperationKind};

/// What already occupies a destination path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// A file (or symlink) already exists at the destination.
    FileExists,
    /// A directory already exists at the destination.
    DirectoryExists,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileExists => write!(f, "File already exists"),
            Self::DirectoryExists => write!(f, "Directory already exists"),
        }
    }
}

/// A source whose destination existed when the batch was prepared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    /// The source path being operated on.
    pub source: PathBuf,
    /// The existing path it would replace.
    pub existing_target: PathBuf,
    /// The kind of conflict.
    pub kind: ConflictKind,
}

/// Batch-wide answer to a non-empty conflict list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Replace every existing destination.
    OverwriteAll,
    /// Leave conflicting sources out of the batch.
    SkipAll,
    /// Cancel the batch without touching anything.
    Abort,
}

/// Collect the sources whose `target_dir/basename(source)` already exists.
///
/// Only copy and move check for conflicts.
pub fn scan_conflicts(
    fs: &dyn FileSystem,
    kind: OperationKind,
    sources: &[PathBuf],
    target_dir: &Path,
) -> Vec<ConflictEntry> {
    if !kind.checks_conflicts() {
        return Vec::new();
    }

    sources
        .iter()
        .filter_map(|source| {
            let destination = unit_destination(kind, source, target_dir);
            let metadata = fs.symlink_metadata(&destination).ok()?;
            let kind = if metadata.is_dir() {
                ConflictKind::DirectoryExists
            } else {
                ConflictKind::FileExists
            };
            Some(ConflictEntry {
                source: source.clone(),
                existing_target: destination,
                kind,
            })
        })
        .collect()
}

/// Reject a batch whose target is one of its source directories or lies
/// beneath one.
pub fn check_self_containment(
    fs: &dyn FileSystem,
    sources: &[PathBuf],
    target_dir: &Path,
) -> Result<(), BatchError> {
    let target = resolve(fs, target_dir);

    for source in sources {
        let is_dir = fs
            .symlink_metadata(source)
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            continue;
        }

        if target.starts_with(resolve(fs, source)) {
            return Err(BatchError::SelfContainment {
                source_dir: source.clone(),
                target: target_dir.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// Whether two paths name the same location once symlinks are resolved.
pub(crate) fn same_location(fs: &dyn FileSystem, a: &Path, b: &Path) -> bool {
    resolve(fs, a) == resolve(fs, b)
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest,
/// so targets that do not exist yet still compare correctly.
fn resolve(fs: &dyn FileSystem, path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing = Vec::new();

    loop {
        let probe = if existing.as_os_str().is_empty() {
            Path::new(".")
        } else {
            existing
        };
        if let Ok(mut resolved) = fs.canonicalize(probe) {
            for part in missing.iter().rev() {
                resolved.push(part);
            }
            return resolved;
        }

        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}
