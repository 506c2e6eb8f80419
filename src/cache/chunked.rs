//! Chunked File-Name Storage Module
//!
//! Stores an entry as a directory of zero-byte files whose names carry the
//! payload: the serialized value is base64 encoded, split into fixed-size
//! chunks and each chunk becomes a file named `<ordinal>-<chunk>`. Creating
//! empty files avoids opening a handle and writing bytes for every entry.
//! The directory's mtime holds the expiry.

use std::fs::{self, Metadata, OpenOptions};
use std::io;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, warn};

use crate::cache::expiry::{ExpiresAt, Liveness};
use crate::cache::key::Digest;
use crate::cache::purge::RecursiveDirectoryPurger;
use crate::cache::shard::ShardPathResolver;
use crate::cache::storage::{EntryStorage, ReadOutcome, StorageMode};
use crate::error::{CacheError, Result};

/// Separates the ordinal from the chunk text in a file name.
pub const ORDINAL_SEPARATOR: char = '-';

/// Base64 character that cannot appear in a file name.
const UNSAFE_CHAR: char = '/';

/// Stand-in for [`UNSAFE_CHAR`], absent from the standard alphabet.
const SAFE_REPLACEMENT: char = '_';

/// How long an unstamped directory counts as a write in progress.
const IN_FLIGHT_WINDOW: Duration = Duration::from_secs(1);

// == Chunked Name Codec ==
/// Converts payload bytes to chunk file names and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedNameCodec {
    chunk_size: usize,
    max_chunks: usize,
}

impl ChunkedNameCodec {
    pub fn new(chunk_size: usize, max_chunks: usize) -> Self {
        Self {
            chunk_size,
            max_chunks,
        }
    }

    /// Largest encoded length an entry may have.
    pub fn limit(&self) -> usize {
        self.chunk_size.saturating_mul(self.max_chunks)
    }

    /// Length of `payload` once encoded for file names.
    pub fn encoded_len(payload_len: usize) -> usize {
        payload_len.div_ceil(3) * 4
    }

    // == Encode ==
    /// Produces the ordered chunk file names for `payload`.
    ///
    /// Fails with [`CacheError::CapacityExceeded`] if the encoded payload does
    /// not fit into `chunk_size * max_chunks` characters.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<String>> {
        let encoded = STANDARD
            .encode(payload)
            .replace(UNSAFE_CHAR, &SAFE_REPLACEMENT.to_string());

        if encoded.len() > self.limit() {
            return Err(CacheError::CapacityExceeded {
                encoded_len: encoded.len(),
                limit: self.limit(),
            });
        }

        if encoded.is_empty() {
            return Ok(vec![format!("0{}", ORDINAL_SEPARATOR)]);
        }

        // base64 output is ASCII, so byte offsets are char boundaries
        let names = (0..encoded.len())
            .step_by(self.chunk_size)
            .enumerate()
            .map(|(ordinal, start)| {
                let end = (start + self.chunk_size).min(encoded.len());
                format!("{}{}{}", ordinal, ORDINAL_SEPARATOR, &encoded[start..end])
            })
            .collect();
        Ok(names)
    }

    // == Decode ==
    /// Rebuilds the payload from an unordered set of chunk file names.
    ///
    /// Returns `None` for an empty set, a name without a numeric ordinal, a
    /// gap or duplicate in the ordinals, or text that is not valid base64.
    pub fn decode<I, S>(&self, names: I) -> Option<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut chunks: Vec<(usize, String)> = Vec::new();
        for name in names {
            let (ordinal, chunk) = name.as_ref().split_once(ORDINAL_SEPARATOR)?;
            let ordinal = ordinal.parse::<usize>().ok()?;
            chunks.push((ordinal, chunk.to_string()));
        }
        if chunks.is_empty() {
            return None;
        }

        chunks.sort_by_key(|(ordinal, _)| *ordinal);
        if chunks
            .iter()
            .enumerate()
            .any(|(expected, (ordinal, _))| expected != *ordinal)
        {
            return None;
        }

        let encoded: String = chunks
            .iter()
            .map(|(_, chunk)| chunk.as_str())
            .collect::<String>()
            .replace(SAFE_REPLACEMENT, &UNSAFE_CHAR.to_string());
        STANDARD.decode(encoded).ok()
    }
}

// == Chunked Storage ==
#[derive(Debug, Clone)]
pub struct ChunkedStorage {
    codec: ChunkedNameCodec,
}

impl ChunkedStorage {
    pub fn new(codec: ChunkedNameCodec) -> Self {
        Self { codec }
    }

    /// Clears whatever occupies `path` and creates an empty entry directory.
    fn prepare_dir(&self, path: &Path) -> Result<()> {
        if fs::symlink_metadata(path).is_ok() {
            self.remove(path)?;
        }
        match fs::create_dir(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => {
                // Another writer got here first; take the directory over
                RecursiveDirectoryPurger::purge(path, true);
                Ok(())
            }
            Err(err) => Err(CacheError::io(path, err)),
        }
    }

    fn write_chunks(&self, path: &Path, names: &[String], expires_at: ExpiresAt) -> Result<()> {
        for name in names {
            let chunk_path = path.join(name);
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&chunk_path)
                .map_err(|err| CacheError::io(&chunk_path, err))?;
        }
        // Must come last: creating children bumps the directory mtime
        expires_at
            .apply_to(path)
            .map_err(|err| CacheError::io(path, err))
    }
}

impl EntryStorage for ChunkedStorage {
    fn mode(&self) -> StorageMode {
        StorageMode::Chunked
    }

    fn entry_name(&self, digest: &Digest, shards: &ShardPathResolver) -> String {
        shards.remainder(digest.as_str()).to_string()
    }

    fn write(&self, path: &Path, payload: &[u8], expires_at: ExpiresAt) -> Result<()> {
        let names = self.codec.encode(payload)?;
        self.prepare_dir(path)?;

        if let Err(err) = self.write_chunks(path, &names, expires_at) {
            warn!("Chunked write to {} failed, rolling back: {}", path.display(), err);
            RecursiveDirectoryPurger::purge(path, false);
            return Err(err);
        }

        debug!(
            "Wrote {} chunks to {} (expires {})",
            names.len(),
            path.display(),
            expires_at
        );
        Ok(())
    }

    fn read(&self, path: &Path) -> ReadOutcome {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => return ReadOutcome::Miss,
        };
        if !metadata.is_dir() {
            return ReadOutcome::Corrupt;
        }
        if is_in_flight(&metadata) {
            debug!("Chunk directory {} is still being written", path.display());
            return ReadOutcome::Miss;
        }
        if ExpiresAt::from_mtime(&metadata).is_expired() {
            return ReadOutcome::Expired;
        }

        let names = match read_names(path) {
            Ok(names) => names,
            Err(err) => {
                debug!("Unreadable chunk directory {}: {}", path.display(), err);
                return ReadOutcome::Miss;
            }
        };
        let Some(names) = names else {
            return ReadOutcome::Corrupt;
        };
        if names.is_empty() {
            return ReadOutcome::Corrupt;
        }

        match self.codec.decode(&names) {
            Some(payload) => ReadOutcome::Hit(payload),
            None => ReadOutcome::Corrupt,
        }
    }

    fn liveness(&self, path: &Path) -> Liveness {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => return Liveness::Missing,
        };
        if !metadata.is_dir() {
            return Liveness::Expired;
        }
        if is_in_flight(&metadata) {
            return Liveness::Missing;
        }
        let expires_at = ExpiresAt::from_mtime(&metadata);
        if expires_at.is_expired() {
            return Liveness::Expired;
        }
        match fs::read_dir(path) {
            Ok(mut entries) => match entries.next() {
                Some(_) => Liveness::Live(expires_at),
                None => Liveness::Expired,
            },
            Err(_) => Liveness::Expired,
        }
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let report = RecursiveDirectoryPurger::purge(path, false);
        if report.failures > 0 && fs::symlink_metadata(path).is_ok() {
            return Err(CacheError::io(
                path,
                io::Error::new(
                    io::ErrorKind::Other,
                    format!("{} paths could not be removed", report.failures),
                ),
            ));
        }
        Ok(())
    }
}

/// Lists the chunk names in `path`; `Ok(None)` if a name is not UTF-8.
fn read_names(path: &Path) -> io::Result<Option<Vec<String>>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(path)? {
        match entry?.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(_) => return Ok(None),
        }
    }
    Ok(Some(names))
}

/// True for a directory a writer has created but not yet stamped.
///
/// Creating chunk files sets the directory mtime and ctime to the same
/// instant; stamping the expiry moves the mtime away from the ctime. Past the
/// window the directory is treated as an abandoned write.
fn is_in_flight(metadata: &Metadata) -> bool {
    if !is_unstamped(metadata) {
        return false;
    }
    let touched = ExpiresAt::from_mtime(metadata);
    !touched.is_expired() || touched.expired_within(IN_FLIGHT_WINDOW)
}

#[cfg(unix)]
fn is_unstamped(metadata: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;

    metadata.mtime() == metadata.ctime() && metadata.mtime_nsec() == metadata.ctime_nsec()
}

#[cfg(not(unix))]
fn is_unstamped(_metadata: &Metadata) -> bool {
    false
}
