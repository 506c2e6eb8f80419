//! Single-File Storage Module
//!
//! Each entry is one file holding the serialized payload, optionally preceded
//! by an expiry header. Writes go through [`AtomicWriter`].

use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::Path;

use fs2::FileExt;
use tracing::debug;

use crate::cache::expiry::{ExpiresAt, ExpirySource, Liveness};
use crate::cache::key::Digest;
use crate::cache::shard::ShardPathResolver;
use crate::cache::storage::{EntryStorage, ReadOutcome, StorageMode};
use crate::cache::writer::AtomicWriter;
use crate::error::{CacheError, Result};

// == Single File Storage ==
#[derive(Debug, Clone)]
pub struct SingleFileStorage {
    writer: AtomicWriter,
    expiry_source: ExpirySource,
    file_suffix: Option<String>,
}

impl SingleFileStorage {
    pub fn new(expiry_source: ExpirySource, file_suffix: Option<String>) -> Self {
        Self {
            writer: AtomicWriter::new(),
            expiry_source,
            file_suffix,
        }
    }

    /// Splits raw file content into expiry and payload according to the expiry source.
    fn decode<'a>(&self, bytes: &'a [u8], metadata: &Metadata) -> Option<(ExpiresAt, &'a [u8])> {
        match self.expiry_source {
            ExpirySource::Mtime => Some((ExpiresAt::from_mtime(metadata), bytes)),
            ExpirySource::Header => ExpiresAt::split_header(bytes),
        }
    }
}

impl EntryStorage for SingleFileStorage {
    fn mode(&self) -> StorageMode {
        StorageMode::SingleFile
    }

    fn entry_name(&self, digest: &Digest, _shards: &ShardPathResolver) -> String {
        match &self.file_suffix {
            Some(suffix) => format!("{}.{}", digest, suffix),
            None => digest.to_string(),
        }
    }

    fn write(&self, path: &Path, payload: &[u8], expires_at: ExpiresAt) -> Result<()> {
        match self.expiry_source {
            ExpirySource::Mtime => self.writer.write(path, payload, expires_at),
            ExpirySource::Header => {
                let bytes = expires_at.encode_header(payload);
                self.writer
                    .write_with(path, expires_at, |file| file.write_all(&bytes))
            }
        }
    }

    fn read(&self, path: &Path) -> ReadOutcome {
        let (bytes, metadata) = match read_locked(path) {
            Ok(Some(read)) => read,
            Ok(None) => return ReadOutcome::Miss,
            Err(err) => {
                debug!("Unreadable cache file {}: {}", path.display(), err);
                return ReadOutcome::Miss;
            }
        };

        match self.decode(&bytes, &metadata) {
            None => ReadOutcome::Corrupt,
            Some((expires_at, _)) if expires_at.is_expired() => ReadOutcome::Expired,
            Some((_, payload)) => ReadOutcome::Hit(payload.to_vec()),
        }
    }

    fn liveness(&self, path: &Path) -> Liveness {
        match self.expiry_source {
            ExpirySource::Mtime => match fs::metadata(path) {
                Ok(metadata) if metadata.is_file() => {
                    let expires_at = ExpiresAt::from_mtime(&metadata);
                    if expires_at.is_expired() {
                        Liveness::Expired
                    } else {
                        Liveness::Live(expires_at)
                    }
                }
                _ => Liveness::Missing,
            },
            ExpirySource::Header => match read_locked(path) {
                Ok(Some((bytes, _))) => match ExpiresAt::split_header(&bytes) {
                    Some((expires_at, _)) if !expires_at.is_expired() => {
                        Liveness::Live(expires_at)
                    }
                    _ => Liveness::Expired,
                },
                _ => Liveness::Missing,
            },
        }
    }

    fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::io(path, err)),
        }
    }
}

/// Reads a whole file under a shared advisory lock.
///
/// Returns `Ok(None)` if `path` is not a regular file.
fn read_locked(path: &Path) -> io::Result<Option<(Vec<u8>, Metadata)>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let metadata = file.metadata()?;
    if !metadata.is_file() {
        return Ok(None);
    }

    let locked = FileExt::lock_shared(&file).is_ok();
    let mut bytes = Vec::with_capacity(metadata.len() as usize);
    let read = file.read_to_end(&mut bytes);
    if locked {
        let _ = FileExt::unlock(&file);
    }
    read?;

    Ok(Some((bytes, metadata)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::expiry::current_timestamp;
    use crate::cache::key::KeyHasher;

    fn later() -> ExpiresAt {
        ExpiresAt::from_unix_seconds(current_timestamp() + 300)
    }

    fn earlier() -> ExpiresAt {
        ExpiresAt::from_unix_seconds(current_timestamp() - 10)
    }

    #[test]
    fn test_entry_name_with_and_without_suffix() {
        let digest = KeyHasher::digest("k");
        let shards = ShardPathResolver::new(2, 1);

        let plain = SingleFileStorage::new(ExpirySource::Mtime, None);
        assert_eq!(plain.entry_name(&digest, &shards), digest.to_string());

        let suffixed = SingleFileStorage::new(ExpirySource::Mtime, Some("cache".to_string()));
        assert_eq!(
            suffixed.entry_name(&digest, &shards),
            format!("{}.cache", digest)
        );
    }

    #[test]
    fn test_write_then_read_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        let storage = SingleFileStorage::new(ExpirySource::Mtime, None);

        storage.write(&path, b"\"value\"", later()).unwrap();

        assert_eq!(storage.read(&path), ReadOutcome::Hit(b"\"value\"".to_vec()));
        assert!(storage.liveness(&path).is_live());
    }

    #[test]
    fn test_write_then_read_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        let storage = SingleFileStorage::new(ExpirySource::Header, None);
        let expires = later();

        storage.write(&path, b"[1,2,3]", expires).unwrap();

        let raw = fs::read(&path).unwrap();
        assert!(raw.starts_with(format!("{}\n", expires.unix_seconds()).as_bytes()));
        assert_eq!(storage.read(&path), ReadOutcome::Hit(b"[1,2,3]".to_vec()));
        assert_eq!(storage.liveness(&path), Liveness::Live(expires));
    }

    #[test]
    fn test_expired_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        let storage = SingleFileStorage::new(ExpirySource::Mtime, None);

        storage.write(&path, b"1", earlier()).unwrap();

        assert_eq!(storage.read(&path), ReadOutcome::Expired);
        assert_eq!(storage.liveness(&path), Liveness::Expired);
    }

    #[test]
    fn test_header_wins_over_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        let storage = SingleFileStorage::new(ExpirySource::Header, None);

        storage.write(&path, b"1", earlier()).unwrap();
        // A copy tool refreshed the mtime, the header still says expired
        later().apply_to(&path).unwrap();

        assert_eq!(storage.read(&path), ReadOutcome::Expired);
    }

    #[test]
    fn test_missing_header_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        fs::write(&path, b"no header").unwrap();
        later().apply_to(&path).unwrap();

        let storage = SingleFileStorage::new(ExpirySource::Header, None);
        assert_eq!(storage.read(&path), ReadOutcome::Corrupt);
    }

    #[test]
    fn test_missing_and_directory_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SingleFileStorage::new(ExpirySource::Mtime, None);

        assert_eq!(storage.read(&dir.path().join("absent")), ReadOutcome::Miss);
        assert_eq!(storage.read(dir.path()), ReadOutcome::Miss);
        assert_eq!(storage.liveness(dir.path()), Liveness::Missing);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        let storage = SingleFileStorage::new(ExpirySource::Mtime, None);

        storage.write(&path, b"1", later()).unwrap();
        storage.remove(&path).unwrap();
        assert!(!path.exists());
        storage.remove(&path).unwrap();
    }
}
