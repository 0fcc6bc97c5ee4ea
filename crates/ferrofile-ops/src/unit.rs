//! Execution of one operation against one source path.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use ferrofile_core::{CancellationToken, UnitError};

use crate::archive;
use crate::conflict::same_location;
use crate::fs::FileSystem;
use crate::operation::OperationKind;
use crate::progress::ProgressState;
use crate::walk::{walk_tree, TreeVisitor, WalkStatus};

/// How a unit of work ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// The whole source was processed.
    Completed,
    /// The cancellation token was observed; partial work is left in place.
    Cancelled,
}

impl From<WalkStatus> for UnitOutcome {
    fn from(status: WalkStatus) -> Self {
        match status {
            WalkStatus::Completed => Self::Completed,
            WalkStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// Shared collaborators a unit runs against.
#[derive(Clone, Copy)]
pub struct UnitContext<'a> {
    pub fs: &'a dyn FileSystem,
    pub cancel: &'a CancellationToken,
    pub progress: &'a ProgressState,
}

/// Per-unit byte accounting, published into the batch counters as it grows.
pub(crate) struct ByteCounter<'a> {
    progress: &'a ProgressState,
    local: u64,
    publish: bool,
}

impl<'a> ByteCounter<'a> {
    pub(crate) fn new(progress: &'a ProgressState) -> Self {
        Self {
            progress,
            local: 0,
            publish: true,
        }
    }

    /// A counter that ignores everything, for phases whose bytes were
    /// already accounted elsewhere.
    pub(crate) fn silent(progress: &'a ProgressState) -> Self {
        Self {
            progress,
            local: 0,
            publish: false,
        }
    }

    pub(crate) fn account(&mut self, bytes: u64) {
        if self.publish {
            self.local += bytes;
            self.progress.add_bytes(bytes);
        }
    }

    pub(crate) fn set_message(&self, verb: &str, path: &Path) {
        if self.publish {
            self.progress.set_message(format!("{verb} {}", display_name(path)));
        }
    }

    pub(crate) fn total(&self) -> u64 {
        self.local
    }
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// One `(kind, source, destination)` triple.
#[derive(Debug, Clone)]
pub struct UnitOperation {
    kind: OperationKind,
    source: PathBuf,
    destination: Option<PathBuf>,
    estimated_bytes: u64,
}

impl UnitOperation {
    /// Create a unit. `destination` is the final path for copy/move and
    /// the output directory for extraction; delete ignores it.
    pub fn new(kind: OperationKind, source: PathBuf, destination: Option<PathBuf>) -> Self {
        Self {
            kind,
            source,
            destination,
            estimated_bytes: 0,
        }
    }

    /// Bytes this unit is expected to contribute, accounted in one step when
    /// a move completes as a plain rename.
    pub fn with_estimate(mut self, bytes: u64) -> Self {
        self.estimated_bytes = bytes;
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Run the unit to completion, cancellation, or the first error.
    pub fn execute(&self, ctx: UnitContext<'_>) -> Result<UnitOutcome, UnitError> {
        let mut counter = ByteCounter::new(ctx.progress);

        // Copying a file onto itself would truncate it.
        if matches!(self.kind, OperationKind::Copy | OperationKind::Move)
            && same_location(ctx.fs, &self.source, self.destination()?)
        {
            tracing::debug!(source = %self.source.display(), "source and destination coincide");
            counter.account(self.estimated_bytes);
            return Ok(UnitOutcome::Completed);
        }

        let outcome = match self.kind {
            OperationKind::Copy => copy_tree(ctx, &self.source, self.destination()?, &mut counter)?,
            OperationKind::Move => self.execute_move(ctx, &mut counter)?,
            OperationKind::Delete => delete_tree(ctx, &self.source, &mut counter)?,
            OperationKind::Extract => {
                archive::extract_archive(ctx, &self.source, self.destination()?, &mut counter)?
            }
        };

        tracing::debug!(
            kind = %self.kind,
            source = %self.source.display(),
            bytes = counter.total(),
            ?outcome,
            "unit finished"
        );
        Ok(outcome)
    }

    fn destination(&self) -> Result<&Path, UnitError> {
        self.destination.as_deref().ok_or_else(|| UnitError::Io {
            path: self.source.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} needs a destination", self.kind),
            ),
        })
    }

    fn execute_move(
        &self,
        ctx: UnitContext<'_>,
        counter: &mut ByteCounter<'_>,
    ) -> Result<UnitOutcome, UnitError> {
        let destination = self.destination()?;
        if ctx.cancel.is_cancelled() {
            return Ok(UnitOutcome::Cancelled);
        }

        counter.set_message("Moving", &self.source);
        match ctx.fs.rename(&self.source, destination) {
            Ok(()) => {
                counter.account(self.estimated_bytes);
                return Ok(UnitOutcome::Completed);
            }
            Err(e) => {
                tracing::debug!(
                    source = %self.source.display(),
                    error = %e,
                    "rename failed, moving by copy and delete"
                );
            }
        }

        // Bytes are accounted while copying; removing the source adds nothing.
        if copy_tree(ctx, &self.source, destination, counter)? == UnitOutcome::Cancelled {
            return Ok(UnitOutcome::Cancelled);
        }
        delete_tree(ctx, &self.source, &mut ByteCounter::silent(ctx.progress))
    }
}

/// Mirror `source` at `destination`, overwriting existing files.
fn copy_tree(
    ctx: UnitContext<'_>,
    source: &Path,
    destination: &Path,
    counter: &mut ByteCounter<'_>,
) -> Result<UnitOutcome, UnitError> {
    let mut visitor = CopyVisitor {
        fs: ctx.fs,
        source_root: source,
        destination_root: destination,
        counter,
    };
    walk_tree(ctx.fs, source, ctx.cancel, &mut visitor).map(UnitOutcome::from)
}

/// Remove `source` depth-first, directories after their children.
fn delete_tree(
    ctx: UnitContext<'_>,
    source: &Path,
    counter: &mut ByteCounter<'_>,
) -> Result<UnitOutcome, UnitError> {
    let mut visitor = DeleteVisitor {
        fs: ctx.fs,
        counter,
    };
    walk_tree(ctx.fs, source, ctx.cancel, &mut visitor).map(UnitOutcome::from)
}

struct CopyVisitor<'a, 'b> {
    fs: &'a dyn FileSystem,
    source_root: &'a Path,
    destination_root: &'a Path,
    counter: &'a mut ByteCounter<'b>,
}

impl CopyVisitor<'_, '_> {
    fn mirror(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(self.source_root) {
            Ok(relative) if !relative.as_os_str().is_empty() => self.destination_root.join(relative),
            _ => self.destination_root.to_path_buf(),
        }
    }
}

impl TreeVisitor for CopyVisitor<'_, '_> {
    fn pre_visit_dir(&mut self, dir: &Path) -> Result<(), UnitError> {
        let target = self.mirror(dir);
        self.fs
            .create_dir_all(&target)
            .map_err(|e| UnitError::io(&target, e))
    }

    fn visit_file(&mut self, path: &Path, metadata: &Metadata) -> Result<(), UnitError> {
        let target = self.mirror(path);

        if metadata.file_type().is_symlink() {
            return self
                .fs
                .copy_symlink(path, &target)
                .map_err(|e| UnitError::io(path, e));
        }

        self.counter.set_message("Copying", path);
        let bytes = self
            .fs
            .copy_file(path, &target)
            .map_err(|e| UnitError::io(path, e))?;
        self.counter.account(bytes);
        Ok(())
    }
}

struct DeleteVisitor<'a, 'b> {
    fs: &'a dyn FileSystem,
    counter: &'a mut ByteCounter<'b>,
}

impl TreeVisitor for DeleteVisitor<'_, '_> {
    fn visit_file(&mut self, path: &Path, metadata: &Metadata) -> Result<(), UnitError> {
        let bytes = if metadata.is_file() { metadata.len() } else { 0 };

        self.counter.set_message("Deleting", path);
        self.fs
            .remove_file(path)
            .map_err(|e| UnitError::io(path, e))?;
        self.counter.account(bytes);
        Ok(())
    }

    fn post_visit_dir(&mut self, dir: &Path) -> Result<(), UnitError> {
        self.fs.remove_dir(dir).map_err(|e| UnitError::io(dir, e))
    }
}
