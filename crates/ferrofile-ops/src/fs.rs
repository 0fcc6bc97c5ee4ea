//! Filesystem primitives used by units of work.
//!
//! Units never call `std::fs` directly; they go through [`FileSystem`] so
//! that failure modes like a cross-device rename can be reproduced in tests.

use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Path, PathBuf};

/// Filesystem operations consumed by the engine.
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    /// Metadata of `path` without following a final symlink.
    fn symlink_metadata(&self, path: &Path) -> io::Result<Metadata>;

    /// Entries of a directory, in no particular order.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Create a directory and all missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Copy a regular file, replacing `to` if it exists. Returns bytes copied.
    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64>;

    /// Recreate the symlink `from` at `to`, replacing `to` if it exists.
    fn copy_symlink(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Atomically rename `from` to `to`. May fail across volumes.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove a file or symlink.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Open a file for reading.
    fn open(&self, path: &Path) -> io::Result<File>;

    /// Create or truncate a file for writing.
    fn create(&self, path: &Path) -> io::Result<File>;

    /// Absolute path with all symlinks resolved. Fails if `path` is missing.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }

    /// Whether anything (including a dangling symlink) exists at `path`.
    fn exists(&self, path: &Path) -> bool {
        self.symlink_metadata(path).is_ok()
    }
}

/// [`FileSystem`] backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn symlink_metadata(&self, path: &Path) -> io::Result<Metadata> {
        fs::symlink_metadata(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        fs::copy(from, to)
    }

    #[cfg(unix)]
    fn copy_symlink(&self, from: &Path, to: &Path) -> io::Result<()> {
        let target = fs::read_link(from)?;
        if fs::symlink_metadata(to).is_ok() {
            fs::remove_file(to)?;
        }
        std::os::unix::fs::symlink(target, to)
    }

    #[cfg(not(unix))]
    fn copy_symlink(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::copy(from, to).map(|_| ())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn open(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }

    fn create(&self, path: &Path) -> io::Result<File> {
        File::create(path)
    }
}
