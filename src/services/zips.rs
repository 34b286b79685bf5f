//! Zip archive operations for order assembly.
//!
//! Archives are built and merged in-process; the size-based *split* step
//! shells out to the external `zipsplit` utility, whose numbered output
//! files are renamed by the trailing-index convention. The zip crate is
//! synchronous, so the file-heavy operations run on the blocking pool.

use std::{
    fs::File,
    io::{self, ErrorKind, Read},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};
use zip::{ZipArchive, ZipWriter, write::SimpleFileOptions};

#[derive(Debug, Error)]
pub enum ZipError {
    #[error("zip file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("invalid zip file: {0}")]
    InvalidArchive(PathBuf),
    #[error("entry larger than max split size")]
    SplitEntryTooLarge { detail: Option<String> },
    #[error("zip split failed: {0}")]
    SplitFailed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

pub type ZipResult<T> = Result<T, ZipError>;

fn open_archive(path: &Path) -> ZipResult<ZipArchive<File>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ZipError::FileNotFound(path.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };
    ZipArchive::new(file).map_err(|_| ZipError::InvalidArchive(path.to_path_buf()))
}

fn write_entry(writer: &mut ZipWriter<File>, source: &Path, name: &str) -> ZipResult<()> {
    writer.start_file(name, SimpleFileOptions::default())?;
    let mut src = File::open(source)?;
    io::copy(&mut src, writer)?;
    Ok(())
}

async fn run_blocking<T, F>(op: F) -> ZipResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ZipResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|err| ZipError::Io(io::Error::other(err)))?
}

/// Zip every top-level file of `src_dir` into `dest_zip`.
pub async fn archive_dir(src_dir: &Path, dest_zip: &Path) -> ZipResult<()> {
    let src_dir = src_dir.to_path_buf();
    let dest_zip = dest_zip.to_path_buf();
    run_blocking(move || {
        let mut writer = ZipWriter::new(File::create(&dest_zip)?);
        let mut entries: Vec<_> = std::fs::read_dir(&src_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            write_entry(&mut writer, &entry.path(), &name)?;
        }
        writer.finish()?;
        Ok(())
    })
    .await
}

/// Zip a single file into `dest_zip` (oversize entries get their own
/// one-entry archive instead of failing the whole split).
pub async fn archive_single(file: &Path, dest_zip: &Path) -> ZipResult<()> {
    let file = file.to_path_buf();
    let dest_zip = dest_zip.to_path_buf();
    run_blocking(move || {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ZipError::FileNotFound(file.clone()))?;
        let mut writer = ZipWriter::new(File::create(&dest_zip)?);
        write_entry(&mut writer, &file, &name)?;
        writer.finish()?;
        Ok(())
    })
    .await
}

/// Extract `zip_path` into `dest_dir` and return the number of extracted
/// top-level files.
pub async fn extract(zip_path: &Path, dest_dir: &Path) -> ZipResult<usize> {
    let zip_path = zip_path.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();
    run_blocking(move || {
        let mut archive = open_archive(&zip_path)?;
        std::fs::create_dir_all(&dest_dir)?;
        archive
            .extract(&dest_dir)
            .map_err(|_| ZipError::InvalidArchive(zip_path.clone()))?;
        let count = std::fs::read_dir(&dest_dir)?.filter_map(|e| e.ok()).count();
        Ok(count)
    })
    .await
}

/// Append every top-level file of `src_dir` to an existing archive.
///
/// Entries are stored under their bare file names; an entry that already
/// exists in the archive is superseded by the appended one on extraction.
pub async fn append_dir(zip_path: &Path, src_dir: &Path) -> ZipResult<()> {
    let zip_path = zip_path.to_path_buf();
    let src_dir = src_dir.to_path_buf();
    run_blocking(move || {
        let file = match File::options().read(true).write(true).open(&zip_path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ZipError::FileNotFound(zip_path.clone()));
            }
            Err(err) => return Err(err.into()),
        };
        let mut writer = ZipWriter::new_append(file)
            .map_err(|_| ZipError::InvalidArchive(zip_path.clone()))?;
        let mut entries: Vec<_> = std::fs::read_dir(&src_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            debug!("appending {} to {}", name, zip_path.display());
            write_entry(&mut writer, &entry.path(), &name)?;
        }
        writer.finish()?;
        Ok(())
    })
    .await
}

const OVERSIZE_MARKER: &str = "Entry is larger than max split size";
const OVERSIZE_DETAIL_PREFIX: &str = "Entry too big to split, read, or write (";

/// Split `input_zip` into parts of at most `max_size` bytes using the
/// external `zipsplit` utility.
///
/// Output files land in `out_dir` with a trailing numeric index in their
/// names. An entry exceeding `max_size` is a distinct failure so the
/// caller can segregate oversize files and retry.
pub async fn split(
    zipsplit_bin: &Path,
    max_size: u64,
    out_dir: &Path,
    input_zip: &Path,
) -> ZipResult<()> {
    let output = Command::new(zipsplit_bin)
        .arg("-n")
        .arg(max_size.to_string())
        .arg("-b")
        .arg(out_dir)
        .arg(input_zip)
        .output()
        .await?;

    if output.status.success() {
        return Ok(());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.contains(OVERSIZE_MARKER) {
        let detail = stdout
            .lines()
            .find_map(|line| line.split_once(OVERSIZE_DETAIL_PREFIX))
            .and_then(|(_, rest)| rest.split(')').next())
            .map(str::to_string);
        return Err(ZipError::SplitEntryTooLarge { detail });
    }

    warn!("zipsplit failed: {}", stdout.trim());
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(ZipError::SplitFailed(if stdout.trim().is_empty() {
        stderr.trim().to_string()
    } else {
        stdout.trim().to_string()
    }))
}

/// Extract the trailing numeric index from a split output name
/// (`order_x12.zip` -> `12`). Names with no index, or made of digits
/// only, yield `None`.
pub fn split_index(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(".zip")?;
    let digits: usize = stem.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 || digits == stem.len() {
        return None;
    }
    let index = &stem[stem.len() - digits..];
    let trimmed = index.trim_start_matches('0');
    Some(if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    })
}

/// Names of every entry in an archive, in archive order.
pub async fn entry_names(zip_path: &Path) -> ZipResult<Vec<String>> {
    let zip_path = zip_path.to_path_buf();
    run_blocking(move || {
        let mut archive = open_archive(&zip_path)?;
        let mut names = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            names.push(archive.by_index(i)?.name().to_string());
        }
        Ok(names)
    })
    .await
}

/// Read one entry of an archive fully into memory.
pub async fn read_entry(zip_path: &Path, name: &str) -> ZipResult<Vec<u8>> {
    let zip_path = zip_path.to_path_buf();
    let name = name.to_string();
    run_blocking(move || {
        let mut archive = open_archive(&zip_path)?;
        let mut entry = archive.by_name(&name)?;
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        Ok(buf)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_index_follows_trailing_number_convention() {
        assert_eq!(split_index("orde1.zip"), Some("1".into()));
        assert_eq!(split_index("x_part02.zip"), Some("2".into()));
        assert_eq!(split_index("order_o1_unrestricted12.zip"), Some("12".into()));
        assert_eq!(split_index("plain.zip"), None);
        assert_eq!(split_index("12345.zip"), None);
        assert_eq!(split_index("not-a-zip1.txt"), None);
    }

    #[tokio::test]
    async fn archive_extract_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.txt"), b"alpha").unwrap();
        std::fs::write(src.join("b.txt"), b"beta").unwrap();

        let zip_path = dir.path().join("out.zip");
        archive_dir(&src, &zip_path).await.unwrap();

        let dest = dir.path().join("dest");
        let count = extract(&zip_path, &dest).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn append_merges_new_entries() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::write(first.join("one.txt"), b"1").unwrap();

        let zip_path = dir.path().join("merged.zip");
        archive_dir(&first, &zip_path).await.unwrap();

        let second = dir.path().join("second");
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(second.join("two.txt"), b"2").unwrap();
        append_dir(&zip_path, &second).await.unwrap();

        let mut names = entry_names(&zip_path).await.unwrap();
        names.sort();
        assert_eq!(names, vec!["one.txt".to_string(), "two.txt".to_string()]);
    }

    #[tokio::test]
    async fn missing_and_corrupt_archives_are_distinguished() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.zip");
        assert!(matches!(
            extract(&missing, &dir.path().join("d")).await,
            Err(ZipError::FileNotFound(_))
        ));

        let corrupt = dir.path().join("corrupt.zip");
        std::fs::write(&corrupt, b"this is not a zip").unwrap();
        assert!(matches!(
            extract(&corrupt, &dir.path().join("d2")).await,
            Err(ZipError::InvalidArchive(_))
        ));
    }
}
