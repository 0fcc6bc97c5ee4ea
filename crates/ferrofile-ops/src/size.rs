//! Recursive byte counting used as the progress denominator.

use std::path::Path;

use ferrofile_core::CancellationToken;

use crate::archive;
use crate::fs::FileSystem;
use crate::operation::OperationKind;

/// Byte total computed by a size estimation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeEstimate {
    /// Sum of regular-file sizes seen.
    pub bytes: u64,
    /// Whether the pass was cut short; `bytes` is then only a partial sum.
    pub cancelled: bool,
}

impl SizeEstimate {
    fn add(&mut self, other: SizeEstimate) {
        self.bytes = self.bytes.saturating_add(other.bytes);
        self.cancelled |= other.cancelled;
    }
}

/// Sum the sizes of regular files under `path` (or of `path` itself).
///
/// Directories and symlinks contribute nothing. Entries that cannot be
/// inspected count as zero and never abort the pass.
pub fn estimate_size(fs: &dyn FileSystem, path: &Path, cancel: &CancellationToken) -> SizeEstimate {
    let mut estimate = SizeEstimate::default();

    if cancel.is_cancelled() {
        estimate.cancelled = true;
        return estimate;
    }

    let metadata = match fs.symlink_metadata(path) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "size estimation skipped entry");
            return estimate;
        }
    };

    if metadata.is_file() {
        estimate.bytes = metadata.len();
    } else if metadata.is_dir() {
        let entries = match fs.read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "size estimation skipped directory");
                return estimate;
            }
        };
        for entry in entries {
            estimate.add(estimate_size(fs, &entry, cancel));
            if estimate.cancelled {
                break;
            }
        }
    }

    estimate
}

/// Estimate the bytes one source of a batch will contribute.
///
/// Archives being extracted are measured by their uncompressed entries.
pub fn estimate_source(
    fs: &dyn FileSystem,
    kind: OperationKind,
    source: &Path,
    cancel: &CancellationToken,
) -> SizeEstimate {
    match kind {
        OperationKind::Extract => match archive::estimate_archive(fs, source, cancel) {
            Ok(estimate) => estimate,
            Err(e) => {
                tracing::warn!(path = %source.display(), error = %e, "cannot estimate archive size");
                SizeEstimate::default()
            }
        },
        _ => estimate_size(fs, source, cancel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::OsFileSystem;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_estimate_directory() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("one.bin"), vec![0u8; 100]).unwrap();
        fs::write(root.join("a/two.bin"), vec![0u8; 250]).unwrap();
        fs::write(root.join("a/b/three.bin"), vec![0u8; 650]).unwrap();

        let estimate = estimate_size(&OsFileSystem, root, &CancellationToken::new());
        assert_eq!(estimate.bytes, 1000);
        assert!(!estimate.cancelled);
    }

    #[test]
    fn test_estimate_single_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f.txt");
        fs::write(&file, "hello").unwrap();

        assert_eq!(
            estimate_size(&OsFileSystem, &file, &CancellationToken::new()).bytes,
            5
        );
    }

    #[test]
    fn test_estimate_missing_is_zero() {
        let temp = TempDir::new().unwrap();
        let estimate = estimate_size(
            &OsFileSystem,
            &temp.path().join("nope"),
            &CancellationToken::new(),
        );
        assert_eq!(estimate, SizeEstimate::default());
    }

    #[test]
    fn test_estimate_cancelled() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("f.txt"), "hello").unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let estimate = estimate_size(&OsFileSystem, temp.path(), &token);
        assert!(estimate.cancelled);
        assert_eq!(estimate.bytes, 0);
    }
}
