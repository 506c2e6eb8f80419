//! Atomic Writer Module
//!
//! Persists a file by writing a uniquely named temporary sibling and renaming
//! it over the final path. Readers only ever see the previous complete file or
//! the new complete file.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::cache::expiry::ExpiresAt;
use crate::error::{CacheError, Result};

/// Distinguishes temporary names generated by this process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// How many fresh temporary names to try before giving up.
const MAX_TMP_ATTEMPTS: usize = 8;

// == Atomic Writer ==
/// Write-to-temp-then-rename file writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicWriter;

impl AtomicWriter {
    pub fn new() -> Self {
        Self
    }

    // == Write ==
    /// Writes `bytes` to `path` and stamps `expires_at` as its mtime.
    ///
    /// The parent directory must exist. Concurrent writers of the same path
    /// race at the rename and the last one wins.
    pub fn write(&self, path: &Path, bytes: &[u8], expires_at: ExpiresAt) -> Result<()> {
        self.write_with(path, expires_at, |file| file.write_all(bytes))
    }

    /// Like [`AtomicWriter::write`], with the content produced by `fill`.
    pub fn write_with<F>(&self, path: &Path, expires_at: ExpiresAt, fill: F) -> Result<()>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        let (tmp_path, mut file) = open_unique_tmp_file(path)?;

        let written = fill(&mut file).and_then(|()| file.flush());
        drop(file);
        if let Err(err) = written {
            remove_tmp_best_effort(&tmp_path);
            return Err(CacheError::io(&tmp_path, err));
        }

        if let Err(err) = expires_at.apply_to(&tmp_path) {
            remove_tmp_best_effort(&tmp_path);
            return Err(CacheError::io(&tmp_path, err));
        }

        if let Err(err) = fs::rename(&tmp_path, path) {
            remove_tmp_best_effort(&tmp_path);
            return Err(CacheError::io(path, err));
        }

        debug!("Wrote {} (expires {})", path.display(), expires_at);
        Ok(())
    }
}

/// Builds `.<file name>.tmp.<pid>.<counter>` next to `dest`.
fn tmp_path_for(dest: &Path, counter: u64) -> Result<PathBuf> {
    let file_name = dest.file_name().ok_or_else(|| {
        CacheError::io(
            dest,
            io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name"),
        )
    })?;
    let mut tmp_name = OsString::from(".");
    tmp_name.push(file_name);
    tmp_name.push(format!(".tmp.{}.{}", std::process::id(), counter));
    Ok(dest.with_file_name(tmp_name))
}

/// The temporary name the next write to `dest` will try first.
#[cfg(test)]
fn next_tmp_path(dest: &Path, ahead: u64) -> Result<PathBuf> {
    tmp_path_for(dest, TMP_COUNTER.load(Ordering::Relaxed) + ahead)
}

/// Creates a fresh temporary file, never reusing one that already exists.
fn open_unique_tmp_file(dest: &Path) -> Result<(PathBuf, File)> {
    for _ in 0..MAX_TMP_ATTEMPTS {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = tmp_path_for(dest, counter)?;

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Temporary file {} already exists, retrying", tmp_path.display());
                continue;
            }
            Err(err) => return Err(CacheError::io(&tmp_path, err)),
        }
    }
    Err(CacheError::TempFileExhausted(dest.to_path_buf()))
}

fn remove_tmp_best_effort(tmp_path: &Path) {
    if let Err(err) = fs::remove_file(tmp_path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(
                "Failed to remove temporary file {}: {}",
                tmp_path.display(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::expiry::current_timestamp;

    fn later() -> ExpiresAt {
        ExpiresAt::from_unix_seconds(current_timestamp() + 300)
    }

    fn leftover_tmp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".tmp."))
            .collect()
    }

    #[test]
    fn test_write_creates_file_with_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        let expires = later();

        AtomicWriter::new().write(&path, b"payload", expires).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"payload");
        let metadata = fs::metadata(&path).unwrap();
        assert_eq!(ExpiresAt::from_mtime(&metadata), expires);
        assert!(leftover_tmp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_write_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        let writer = AtomicWriter::new();

        writer.write(&path, b"first version, longer", later()).unwrap();
        writer.write(&path, b"second", later()).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_failed_fill_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        let writer = AtomicWriter::new();
        writer.write(&path, b"old", later()).unwrap();

        let result = writer.write_with(&path, later(), |file| {
            file.write_all(b"half of the new")?;
            Err(io::Error::new(io::ErrorKind::Other, "interrupted"))
        });

        assert!(matches!(result, Err(CacheError::Io { .. })));
        assert_eq!(fs::read(&path).unwrap(), b"old");
        assert!(leftover_tmp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_missing_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("entry");

        let result = AtomicWriter::new().write(&path, b"x", later());
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_tmp_names_are_hidden_siblings() {
        let dest = Path::new("/cache/ab/abcdef");
        let tmp = tmp_path_for(dest, 7).unwrap();
        assert_eq!(tmp.parent(), dest.parent());
        let name = tmp.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".abcdef.tmp."));
        assert!(name.ends_with(".7"));
    }

    #[test]
    fn test_write_skips_existing_temp_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");

        // Left behind by a writer that shared our pid, e.g. across a restart
        let taken: Vec<PathBuf> = (0..MAX_TMP_ATTEMPTS as u64 - 1)
            .map(|ahead| next_tmp_path(&path, ahead).unwrap())
            .collect();
        for tmp in &taken {
            fs::write(tmp, b"other writer").unwrap();
        }

        AtomicWriter::new().write(&path, b"payload", later()).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"payload");
        for tmp in &taken {
            assert_eq!(fs::read(tmp).unwrap(), b"other writer");
        }
        assert_eq!(leftover_tmp_files(dir.path()).len(), taken.len());
    }
}
