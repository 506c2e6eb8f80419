//! Configuration Module
//!
//! Handles loading and validating the cache engine configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{ExpirySource, StorageMode, CLUSTER_DIR, DIGEST_LEN};
use crate::error::{CacheError, Result};

/// Longest file name accepted by common filesystems.
const MAX_FILE_NAME_LEN: usize = 255;

/// Engine configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root directory of the cache, must already exist
    pub cache_dir: PathBuf,
    /// Physical encoding used for entries
    pub mode: StorageMode,
    /// Hex characters per shard directory level
    pub shard_width: usize,
    /// Number of shard directory levels
    pub shard_depth: usize,
    /// Payload characters per chunk file name (chunked mode)
    pub chunk_size: usize,
    /// Maximum number of chunk files per entry (chunked mode)
    pub max_chunks: usize,
    /// Default TTL in seconds for entries saved without explicit TTL
    pub default_ttl: u64,
    /// Where single-file entries keep their expiry timestamp
    pub expiry_source: ExpirySource,
    /// Optional extension appended to single-file entry names
    pub file_suffix: Option<String>,
    /// Root-level directory that holds all clusters
    pub cluster_dir: String,
}

impl Config {
    /// Creates a configuration with the layout defaults of the given storage mode.
    ///
    /// Single-file entries use one shard level, chunked entries use two so the
    /// entry directory name is the remainder of the digest.
    pub fn for_mode(mode: StorageMode) -> Self {
        let shard_depth = match mode {
            StorageMode::SingleFile => 1,
            StorageMode::Chunked => 2,
        };
        Self {
            cache_dir: PathBuf::from("./cache"),
            mode,
            shard_width: 2,
            shard_depth,
            chunk_size: 248,
            max_chunks: 6,
            default_ttl: 3600,
            expiry_source: ExpirySource::Mtime,
            file_suffix: None,
            cluster_dir: CLUSTER_DIR.to_string(),
        }
    }

    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `FSCACHE_DIR` - Cache root directory (default: ./cache)
    /// - `FSCACHE_MODE` - `single` or `chunked` (default: single)
    /// - `FSCACHE_SHARD_WIDTH` - Characters per shard level (default: 2)
    /// - `FSCACHE_SHARD_DEPTH` - Shard levels (default: 1 single, 2 chunked)
    /// - `FSCACHE_CHUNK_SIZE` - Characters per chunk name (default: 248)
    /// - `FSCACHE_MAX_CHUNKS` - Chunks per entry (default: 6)
    /// - `FSCACHE_DEFAULT_TTL` - Default TTL in seconds (default: 3600)
    /// - `FSCACHE_EXPIRY` - `mtime` or `header` (default: mtime)
    /// - `FSCACHE_FILE_SUFFIX` - Extension for single-file entries (default: none)
    /// - `FSCACHE_CLUSTER_DIR` - Directory holding all clusters (default: clusters)
    pub fn from_env() -> Self {
        let mode = parse_env("FSCACHE_MODE").unwrap_or_default();
        let defaults = Self::for_mode(mode);

        Self {
            cache_dir: env::var("FSCACHE_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            mode,
            shard_width: parse_env("FSCACHE_SHARD_WIDTH").unwrap_or(defaults.shard_width),
            shard_depth: parse_env("FSCACHE_SHARD_DEPTH").unwrap_or(defaults.shard_depth),
            chunk_size: parse_env("FSCACHE_CHUNK_SIZE").unwrap_or(defaults.chunk_size),
            max_chunks: parse_env("FSCACHE_MAX_CHUNKS").unwrap_or(defaults.max_chunks),
            default_ttl: parse_env("FSCACHE_DEFAULT_TTL").unwrap_or(defaults.default_ttl),
            expiry_source: parse_env("FSCACHE_EXPIRY").unwrap_or(defaults.expiry_source),
            file_suffix: env::var("FSCACHE_FILE_SUFFIX")
                .ok()
                .filter(|v| !v.is_empty()),
            cluster_dir: env::var("FSCACHE_CLUSTER_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.cluster_dir),
        }
    }

    /// Sets the cache root directory.
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    /// Default TTL as a duration.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    /// Rejects combinations that would produce an ambiguous or unusable layout.
    pub fn validate(&self) -> Result<()> {
        if self.shard_width == 0 || self.shard_depth == 0 {
            return Err(CacheError::InvalidConfig(
                "shard width and depth must be at least 1".to_string(),
            ));
        }

        let prefix_len = self.shard_width.saturating_mul(self.shard_depth);
        if self.mode == StorageMode::Chunked && prefix_len >= DIGEST_LEN {
            return Err(CacheError::InvalidConfig(format!(
                "chunked mode needs a digest remainder, but the shard prefix consumes {} of {} characters",
                prefix_len, DIGEST_LEN
            )));
        }

        if self.mode == StorageMode::Chunked {
            if self.chunk_size == 0 || self.max_chunks == 0 {
                return Err(CacheError::InvalidConfig(
                    "chunk size and max chunks must be at least 1".to_string(),
                ));
            }
            let ordinal_len = (self.max_chunks - 1).to_string().len();
            let name_len = ordinal_len + 1 + self.chunk_size;
            if name_len > MAX_FILE_NAME_LEN {
                return Err(CacheError::InvalidConfig(format!(
                    "chunk file names would be {} bytes long, the limit is {}",
                    name_len, MAX_FILE_NAME_LEN
                )));
            }
            if self.expiry_source == ExpirySource::Header {
                return Err(CacheError::InvalidConfig(
                    "header expiry is only available in single-file mode".to_string(),
                ));
            }
        }

        if let Some(suffix) = &self.file_suffix {
            if suffix.contains(['/', '\\']) {
                return Err(CacheError::InvalidConfig(format!(
                    "file suffix '{}' must not contain path separators",
                    suffix
                )));
            }
        }

        let marker = self.cluster_dir.as_str();
        if marker.is_empty()
            || marker == "."
            || marker == ".."
            || marker.contains(['/', '\\'])
            || marker.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(CacheError::InvalidConfig(format!(
                "cluster directory '{}' must be a single name with a non-hex character",
                marker
            )));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::for_mode(StorageMode::SingleFile)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
