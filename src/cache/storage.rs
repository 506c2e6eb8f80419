//! Entry Storage Module
//!
//! The capability interface shared by the physical encodings. The engine
//! serializes values to bytes and resolves paths; an `EntryStorage` decides
//! how those bytes and the expiry land on disk.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::cache::expiry::{ExpiresAt, Liveness};
use crate::cache::key::Digest;
use crate::cache::shard::ShardPathResolver;
use crate::error::Result;

// == Storage Mode ==
/// Physical encoding of entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// One file per entry, written atomically
    #[default]
    SingleFile,
    /// One directory per entry whose zero-byte file names hold the payload
    Chunked,
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" | "single-file" | "file" => Ok(StorageMode::SingleFile),
            "chunked" | "filename" => Ok(StorageMode::Chunked),
            other => Err(format!("unknown storage mode '{}'", other)),
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::SingleFile => f.write_str("single"),
            StorageMode::Chunked => f.write_str("chunked"),
        }
    }
}

// == Read Outcome ==
/// What a storage found at an entry path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Live entry with its serialized payload
    Hit(Vec<u8>),
    /// Nothing usable at the path
    Miss,
    /// Entry present but its expiry has passed
    Expired,
    /// Entry present but undecodable
    Corrupt,
}

// == Entry Storage ==
/// One physical encoding of cache entries.
pub trait EntryStorage: fmt::Debug + Send + Sync {
    fn mode(&self) -> StorageMode;

    /// Name of the entry inside its shard directory.
    fn entry_name(&self, digest: &Digest, shards: &ShardPathResolver) -> String;

    /// Persists `payload` at `path`, replacing any previous entry.
    ///
    /// The parent directory must exist.
    fn write(&self, path: &Path, payload: &[u8], expires_at: ExpiresAt) -> Result<()>;

    /// Reads the entry at `path` without deleting anything.
    fn read(&self, path: &Path) -> ReadOutcome;

    /// Checks liveness without decoding the payload.
    fn liveness(&self, path: &Path) -> Liveness;

    /// Removes the entry at `path`. Removing an absent entry succeeds.
    fn remove(&self, path: &Path) -> Result<()>;
}
