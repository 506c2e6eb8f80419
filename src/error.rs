//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror. Only write-side
//! operations surface errors; reads report absence as `None`.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Filesystem call failed
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Chunked encoding does not fit into the configured chunk budget
    #[error("value too large: encoded length {encoded_len} exceeds limit of {limit} bytes")]
    CapacityExceeded { encoded_len: usize, limit: usize },

    /// Value or structured key could not be serialized
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Cache root is missing or not a directory
    #[error("cache directory not found: {0}")]
    RootNotFound(PathBuf),

    /// Rejected configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Every generated temporary name already existed
    #[error("could not allocate a temporary file next to {0}")]
    TempFileExhausted(PathBuf),
}

impl CacheError {
    /// Wraps an io error together with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        CacheError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Returns true for the one error that signals a value the chunked mode can never hold.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, CacheError::CapacityExceeded { .. })
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
