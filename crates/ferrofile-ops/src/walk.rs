//! Cancellable recursive tree walk with pre-visit, visit and post-visit steps.

use std::fs::Metadata;
use std::path::Path;

use ferrofile_core::{CancellationToken, UnitError};

use crate::fs::FileSystem;

/// How a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkStatus {
    Completed,
    Cancelled,
}

/// Callbacks invoked by [`walk_tree`].
///
/// Returning an error aborts the walk and the error is propagated.
pub(crate) trait TreeVisitor {
    /// Called for a directory before any of its children.
    fn pre_visit_dir(&mut self, _dir: &Path) -> Result<(), UnitError> {
        Ok(())
    }

    /// Called for every non-directory entry (regular files and symlinks).
    fn visit_file(&mut self, path: &Path, metadata: &Metadata) -> Result<(), UnitError>;

    /// Called for a directory after all of its children.
    fn post_visit_dir(&mut self, _dir: &Path) -> Result<(), UnitError> {
        Ok(())
    }
}

/// Walk `root` depth-first, checking `cancel` before every step.
///
/// Symlinks are reported to [`TreeVisitor::visit_file`] and never followed.
/// Cancellation stops the walk without an error.
pub(crate) fn walk_tree<V: TreeVisitor>(
    fs: &dyn FileSystem,
    root: &Path,
    cancel: &CancellationToken,
    visitor: &mut V,
) -> Result<WalkStatus, UnitError> {
    let metadata = fs
        .symlink_metadata(root)
        .map_err(|e| UnitError::io(root, e))?;

    if metadata.is_dir() {
        walk_dir(fs, root, cancel, visitor)
    } else {
        if cancel.is_cancelled() {
            return Ok(WalkStatus::Cancelled);
        }
        visitor.visit_file(root, &metadata)?;
        Ok(WalkStatus::Completed)
    }
}

fn walk_dir<V: TreeVisitor>(
    fs: &dyn FileSystem,
    dir: &Path,
    cancel: &CancellationToken,
    visitor: &mut V,
) -> Result<WalkStatus, UnitError> {
    if cancel.is_cancelled() {
        return Ok(WalkStatus::Cancelled);
    }
    visitor.pre_visit_dir(dir)?;

    let mut entries = fs.read_dir(dir).map_err(|e| UnitError::io(dir, e))?;
    entries.sort();

    for entry in entries {
        let metadata = fs
            .symlink_metadata(&entry)
            .map_err(|e| UnitError::io(&entry, e))?;

        if metadata.is_dir() {
            if walk_dir(fs, &entry, cancel, visitor)? == WalkStatus::Cancelled {
                return Ok(WalkStatus::Cancelled);
            }
        } else {
            if cancel.is_cancelled() {
                return Ok(WalkStatus::Cancelled);
            }
            visitor.visit_file(&entry, &metadata)?;
        }
    }

    if cancel.is_cancelled() {
        return Ok(WalkStatus::Cancelled);
    }
    visitor.post_visit_dir(dir)?;
    Ok(WalkStatus::Completed)
}
