//! Archive measurement and extraction for zip and tar families.

use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use ferrofile_core::{CancellationToken, UnitError};
use zip::ZipArchive;

use crate::fs::FileSystem;
use crate::size::SizeEstimate;
use crate::unit::{ByteCounter, UnitContext, UnitOutcome};

/// Archive container recognised from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarXz,
    TarBz2,
}

impl ArchiveFormat {
    /// Detect the format from the final path component, case-insensitively.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();

        if name.ends_with(".zip") || name.ends_with(".jar") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(Self::TarBz2)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

fn detect(path: &Path) -> Result<ArchiveFormat, UnitError> {
    ArchiveFormat::detect(path).ok_or_else(|| UnitError::UnsupportedArchive {
        path: path.to_path_buf(),
    })
}

fn open_zip(fs: &dyn FileSystem, path: &Path) -> Result<ZipArchive<BufReader<std::fs::File>>, UnitError> {
    let file = fs.open(path).map_err(|e| UnitError::io(path, e))?;
    ZipArchive::new(BufReader::new(file)).map_err(|e| UnitError::archive(path, e))
}

fn open_tar(
    fs: &dyn FileSystem,
    path: &Path,
    format: ArchiveFormat,
) -> Result<tar::Archive<Box<dyn Read>>, UnitError> {
    let file = BufReader::new(fs.open(path).map_err(|e| UnitError::io(path, e))?);
    let reader: Box<dyn Read> = match format {
        ArchiveFormat::TarGz => Box::new(flate2::read::GzDecoder::new(file)),
        ArchiveFormat::TarXz => Box::new(xz2::read::XzDecoder::new(file)),
        ArchiveFormat::TarBz2 => Box::new(bzip2::read::BzDecoder::new(file)),
        ArchiveFormat::Tar | ArchiveFormat::Zip => Box::new(file),
    };
    Ok(tar::Archive::new(reader))
}

/// Sum the uncompressed sizes of the regular-file entries of an archive.
pub(crate) fn estimate_archive(
    fs: &dyn FileSystem,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<SizeEstimate, UnitError> {
    let format = detect(path)?;
    let mut estimate = SizeEstimate::default();

    if format == ArchiveFormat::Zip {
        let mut archive = open_zip(fs, path)?;
        for index in 0..archive.len() {
            if cancel.is_cancelled() {
                estimate.cancelled = true;
                break;
            }
            let entry = archive
                .by_index(index)
                .map_err(|e| UnitError::archive(path, e))?;
            if !entry.is_dir() {
                estimate.bytes = estimate.bytes.saturating_add(entry.size());
            }
        }
        return Ok(estimate);
    }

    let mut archive = open_tar(fs, path, format)?;
    for entry in archive.entries().map_err(|e| UnitError::archive(path, e))? {
        if cancel.is_cancelled() {
            estimate.cancelled = true;
            break;
        }
        let entry = entry.map_err(|e| UnitError::archive(path, e))?;
        if entry.header().entry_type().is_file() {
            estimate.bytes = estimate.bytes.saturating_add(entry.size());
        }
    }
    Ok(estimate)
}

/// Unpack `source` into `target_dir`, accounting bytes per finished entry.
pub(crate) fn extract_archive(
    ctx: UnitContext<'_>,
    source: &Path,
    target_dir: &Path,
    counter: &mut ByteCounter<'_>,
) -> Result<UnitOutcome, UnitError> {
    let format = detect(source)?;
    ctx.fs
        .create_dir_all(target_dir)
        .map_err(|e| UnitError::io(target_dir, e))?;
    counter.set_message("Extracting", source);

    if format == ArchiveFormat::Zip {
        extract_zip(ctx, source, target_dir, counter)
    } else {
        extract_tar(ctx, source, format, target_dir, counter)
    }
}

fn extract_zip(
    ctx: UnitContext<'_>,
    source: &Path,
    target_dir: &Path,
    counter: &mut ByteCounter<'_>,
) -> Result<UnitOutcome, UnitError> {
    let mut archive = open_zip(ctx.fs, source)?;

    for index in 0..archive.len() {
        if ctx.cancel.is_cancelled() {
            return Ok(UnitOutcome::Cancelled);
        }
        let mut entry = archive
            .by_index(index)
            .map_err(|e| UnitError::archive(source, e))?;

        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(
                archive = %source.display(),
                entry = entry.name(),
                "skipping entry outside the target directory"
            );
            continue;
        };
        let target = target_dir.join(relative);

        if entry.is_dir() {
            ctx.fs
                .create_dir_all(&target)
                .map_err(|e| UnitError::io(&target, e))?;
        } else {
            let bytes = write_entry(ctx.fs, &mut entry, &target)?;
            counter.account(bytes);
        }
    }

    Ok(UnitOutcome::Completed)
}

fn extract_tar(
    ctx: UnitContext<'_>,
    source: &Path,
    format: ArchiveFormat,
    target_dir: &Path,
    counter: &mut ByteCounter<'_>,
) -> Result<UnitOutcome, UnitError> {
    let mut archive = open_tar(ctx.fs, source, format)?;

    for entry in archive.entries().map_err(|e| UnitError::archive(source, e))? {
        if ctx.cancel.is_cancelled() {
            return Ok(UnitOutcome::Cancelled);
        }
        let mut entry = entry.map_err(|e| UnitError::archive(source, e))?;
        let entry_type = entry.header().entry_type();
        let raw = entry
            .path()
            .map_err(|e| UnitError::archive(source, e))?
            .into_owned();

        let Some(relative) = enclosed_path(&raw) else {
            tracing::warn!(
                archive = %source.display(),
                entry = %raw.display(),
                "skipping entry outside the target directory"
            );
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = target_dir.join(relative);

        if entry_type.is_dir() {
            ctx.fs
                .create_dir_all(&target)
                .map_err(|e| UnitError::io(&target, e))?;
        } else if entry_type.is_file() {
            let bytes = write_entry(ctx.fs, &mut entry, &target)?;
            counter.account(bytes);
        } else {
            tracing::debug!(entry = %raw.display(), ?entry_type, "skipping special tar entry");
        }
    }

    Ok(UnitOutcome::Completed)
}

/// Relative form of an entry name, or `None` if it would escape the target.
fn enclosed_path(raw: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

fn write_entry(fs: &dyn FileSystem, reader: &mut impl Read, target: &Path) -> Result<u64, UnitError> {
    if let Some(parent) = target.parent() {
        fs.create_dir_all(parent)
            .map_err(|e| UnitError::io(parent, e))?;
    }
    let mut out = fs.create(target).map_err(|e| UnitError::io(target, e))?;
    io::copy(reader, &mut out).map_err(|e| UnitError::io(target, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::OsFileSystem;
    use crate::operation::OperationKind;
    use crate::progress::ProgressState;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn build_zip(path: &Path) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("docs/", options).unwrap();
        writer.start_file("docs/readme.txt", options).unwrap();
        writer.write_all(&[b'r'; 120]).unwrap();
        writer.start_file("top.bin", options).unwrap();
        writer.write_all(&[b't'; 80]).unwrap();
        writer.start_file("../escape.txt", options).unwrap();
        writer.write_all(b"nope").unwrap();
        writer.finish().unwrap();
    }

    fn build_tar_gz(path: &Path) {
        let encoder = flate2::write::GzEncoder::new(File::create(path).unwrap(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, len) in [("pkg/a.txt", 300usize), ("pkg/sub/b.txt", 700)] {
            let data = vec![b'x'; len];
            let mut header = tar::Header::new_gnu();
            header.set_size(len as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data.as_slice()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn extract(source: &Path, target: &Path, progress: &ProgressState) -> Result<UnitOutcome, UnitError> {
        let cancel = CancellationToken::new();
        let ctx = UnitContext {
            fs: &OsFileSystem,
            cancel: &cancel,
            progress,
        };
        let mut counter = ByteCounter::new(progress);
        extract_archive(ctx, source, target, &mut counter)
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(ArchiveFormat::detect(Path::new("a.ZIP")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect(Path::new("lib.jar")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect(Path::new("a.tar.gz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(Path::new("a.tbz2")), Some(ArchiveFormat::TarBz2));
        assert_eq!(ArchiveFormat::detect(Path::new("a.txz")), Some(ArchiveFormat::TarXz));
        assert_eq!(ArchiveFormat::detect(Path::new("a.tar")), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::detect(Path::new("a.rar")), None);
    }

    #[test]
    fn test_enclosed_path() {
        assert_eq!(enclosed_path(Path::new("./a/b")), Some(PathBuf::from("a/b")));
        assert_eq!(enclosed_path(Path::new("a/../../b")), None);
        assert_eq!(enclosed_path(Path::new("/etc/passwd")), None);
    }

    #[test]
    fn test_zip_estimate_and_extract() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("bundle.zip");
        let target = temp.path().join("out");
        build_zip(&archive);

        let estimate = estimate_archive(&OsFileSystem, &archive, &CancellationToken::new()).unwrap();
        assert_eq!(estimate.bytes, 204);

        let progress = ProgressState::new(OperationKind::Extract, 1);
        assert_eq!(extract(&archive, &target, &progress).unwrap(), UnitOutcome::Completed);

        assert_eq!(fs::read(target.join("docs/readme.txt")).unwrap().len(), 120);
        assert_eq!(fs::read(target.join("top.bin")).unwrap().len(), 80);
        assert!(!temp.path().join("escape.txt").exists());
        assert_eq!(progress.processed_bytes(), 200);
    }

    #[test]
    fn test_tar_gz_extract() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("pkg.tar.gz");
        let target = temp.path().join("out");
        build_tar_gz(&archive);

        let estimate = estimate_archive(&OsFileSystem, &archive, &CancellationToken::new()).unwrap();
        assert_eq!(estimate.bytes, 1000);

        let progress = ProgressState::new(OperationKind::Extract, 1);
        extract(&archive, &target, &progress).unwrap();

        assert_eq!(fs::read(target.join("pkg/sub/b.txt")).unwrap(), vec![b'x'; 700]);
        assert_eq!(progress.processed_bytes(), 1000);
    }

    #[test]
    fn test_unsupported_archive() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("data.rar");
        fs::write(&archive, "not really").unwrap();
        let progress = ProgressState::new(OperationKind::Extract, 1);

        assert!(matches!(
            extract(&archive, &temp.path().join("out"), &progress),
            Err(UnitError::UnsupportedArchive { .. })
        ));
    }

    #[test]
    fn test_corrupt_zip() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("broken.zip");
        fs::write(&archive, "definitely not a zip").unwrap();

        assert!(matches!(
            estimate_archive(&OsFileSystem, &archive, &CancellationToken::new()),
            Err(UnitError::Archive { .. })
        ));
    }
}
