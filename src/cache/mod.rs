//! Cache Module
//!
//! Filesystem-backed key/value storage with sharded layout, atomic writes,
//! TTL expiry and cluster namespaces.

mod chunked;
mod cluster;
mod expiry;
mod key;
mod purge;
mod shard;
mod single_file;
mod stats;
mod storage;
mod store;
mod writer;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use chunked::{ChunkedNameCodec, ChunkedStorage, ORDINAL_SEPARATOR};
pub use cluster::{ClusterNamespace, Namespace, CLUSTER_DIR};
pub use expiry::{current_timestamp, ExpiresAt, ExpirySource, Liveness};
pub use key::{CacheKey, Digest, KeyHasher, StructuredKey, DIGEST_LEN};
pub use purge::{PurgeReport, RecursiveDirectoryPurger};
pub use shard::ShardPathResolver;
pub use single_file::SingleFileStorage;
pub use stats::{CacheStats, StatsRecorder};
pub use storage::{EntryStorage, ReadOutcome, StorageMode};
pub use store::{CacheEngine, ClusterView};
pub use writer::AtomicWriter;
