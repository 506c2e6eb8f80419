//! fs_cache - A filesystem-backed key/value cache
//!
//! Values are serialized to JSON and stored under a sharded directory tree,
//! either one file per entry or as payload-carrying file names. Expiry is
//! tracked on disk so several processes can share one cache directory.

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{CacheEngine, ClusterView, StorageMode};
pub use config::Config;
pub use error::{CacheError, Result};
