//! Cache Engine Module
//!
//! Main cache engine combining key hashing, sharded paths, cluster
//! namespaces and a storage encoding. All operations are synchronous
//! filesystem calls; the only in-process state is the statistics counters.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::chunked::{ChunkedNameCodec, ChunkedStorage};
use crate::cache::cluster::{ClusterNamespace, Namespace};
use crate::cache::expiry::{ExpiresAt, Liveness};
use crate::cache::key::{CacheKey, KeyHasher};
use crate::cache::purge::{PurgeReport, RecursiveDirectoryPurger};
use crate::cache::shard::ShardPathResolver;
use crate::cache::single_file::SingleFileStorage;
use crate::cache::stats::{CacheStats, StatsRecorder};
use crate::cache::storage::{EntryStorage, ReadOutcome, StorageMode};
use crate::config::Config;
use crate::error::{CacheError, Result};

// == Cache Engine ==
/// Filesystem-backed key/value cache.
#[derive(Debug)]
pub struct CacheEngine {
    /// Canonical cache root
    cache_dir: PathBuf,
    /// Digest prefix to directory levels
    shards: ShardPathResolver,
    /// Cluster directories under the root
    clusters: ClusterNamespace,
    /// Physical encoding of entries
    storage: Box<dyn EntryStorage>,
    /// TTL for saves without explicit TTL
    default_ttl: Duration,
    /// Read and write counters
    stats: StatsRecorder,
}

impl CacheEngine {
    // == Constructor ==
    /// Opens the cache rooted at `config.cache_dir`.
    ///
    /// The root must already exist; it is canonicalized so every derived path
    /// is absolute.
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;

        if !config.cache_dir.is_dir() {
            return Err(CacheError::RootNotFound(config.cache_dir.clone()));
        }
        let cache_dir = config
            .cache_dir
            .canonicalize()
            .map_err(|err| CacheError::io(&config.cache_dir, err))?;

        let storage: Box<dyn EntryStorage> = match config.mode {
            StorageMode::SingleFile => Box::new(SingleFileStorage::new(
                config.expiry_source,
                config.file_suffix.clone(),
            )),
            StorageMode::Chunked => Box::new(ChunkedStorage::new(ChunkedNameCodec::new(
                config.chunk_size,
                config.max_chunks,
            ))),
        };

        debug!(
            "Opened {} cache at {} (shard {}x{})",
            config.mode,
            cache_dir.display(),
            config.shard_depth,
            config.shard_width
        );

        Ok(Self {
            clusters: ClusterNamespace::new(&cache_dir, &config.cluster_dir),
            cache_dir,
            shards: ShardPathResolver::new(config.shard_width, config.shard_depth),
            storage,
            default_ttl: config.default_ttl(),
            stats: StatsRecorder::new(),
        })
    }

    /// Canonical root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn mode(&self) -> StorageMode {
        self.storage.mode()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Number of successful decodes since this engine was opened.
    pub fn read_count(&self) -> u64 {
        self.stats.read_count()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    // == Paths ==
    /// Namespace of plain (non-cluster) entries.
    pub fn root_namespace(&self) -> Namespace {
        Namespace::Root(self.cache_dir.clone())
    }

    /// Path of the file or directory that holds `key` inside `namespace`.
    pub fn entry_path<K: CacheKey + ?Sized>(&self, namespace: &Namespace, key: &K) -> PathBuf {
        let digest = KeyHasher::digest(key);
        self.shards
            .shard_dir(namespace.base(), digest.as_str())
            .join(self.storage.entry_name(&digest, &self.shards))
    }

    // == Get ==
    /// Returns the live value stored under `key`.
    ///
    /// Expired and undecodable entries are deleted and reported as `None`.
    pub fn get<T, K>(&self, key: &K) -> Option<T>
    where
        T: DeserializeOwned,
        K: CacheKey + ?Sized,
    {
        self.get_in(&self.root_namespace(), key)
    }

    // == Get Or Save ==
    /// Returns the cached value, or computes, saves and returns it.
    ///
    /// Nothing is stored when `produce` returns `None`. A failed save is
    /// logged and the computed value is still returned.
    pub fn get_or_save<T, K, F>(&self, key: &K, ttl: Option<Duration>, produce: F) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        K: CacheKey + ?Sized,
        F: FnOnce() -> Option<T>,
    {
        self.get_or_save_in(&self.root_namespace(), key, ttl, produce)
    }

    // == Save ==
    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// # Arguments
    /// * `key` - The key to store
    /// * `value` - The value to store
    /// * `ttl` - Optional TTL (uses the default TTL if None)
    pub fn save<T, K>(&self, key: &K, value: &T, ttl: Option<Duration>) -> Result<()>
    where
        T: Serialize + ?Sized,
        K: CacheKey + ?Sized,
    {
        self.save_in(&self.root_namespace(), key, value, ttl)
    }

    // == Exists ==
    /// Returns true if a live entry is stored under `key`. Expired entries are reaped.
    pub fn exists<K: CacheKey + ?Sized>(&self, key: &K) -> bool {
        self.exists_in(&self.root_namespace(), key)
    }

    // == Delete ==
    /// Removes the entry stored under `key`. Deleting an absent key succeeds.
    pub fn delete<K: CacheKey + ?Sized>(&self, key: &K) -> Result<()> {
        self.delete_in(&self.root_namespace(), key)
    }

    // == Delete All ==
    /// Removes every plain entry, keeping the root directory.
    ///
    /// Cluster entries are removed too when `include_clusters` is set.
    pub fn delete_all(&self, include_clusters: bool) -> Result<PurgeReport> {
        let entries =
            fs::read_dir(&self.cache_dir).map_err(|err| CacheError::io(&self.cache_dir, err))?;

        let mut report = PurgeReport::default();
        for entry in entries.flatten() {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            if self.clusters.is_marker(name) {
                if include_clusters {
                    report.merge(RecursiveDirectoryPurger::purge(&entry.path(), false));
                }
                continue;
            }
            if is_dir && self.shards.is_shard_dir_name(name) {
                report.merge(RecursiveDirectoryPurger::purge(&entry.path(), false));
            }
        }

        info!(
            "Purged cache {} (clusters included: {}): {} files, {} dirs, {} failures",
            self.cache_dir.display(),
            include_clusters,
            report.files_removed,
            report.dirs_removed,
            report.failures
        );
        Ok(report)
    }

    // == Clusters ==
    /// Returns a view scoped to the cluster `name`.
    pub fn cluster<N: CacheKey + ?Sized>(&self, name: &N) -> ClusterView<'_> {
        ClusterView {
            engine: self,
            namespace: self.clusters.scope(name),
        }
    }

    pub fn get_from_cluster<T, K, N>(&self, key: &K, cluster: &N) -> Option<T>
    where
        T: DeserializeOwned,
        K: CacheKey + ?Sized,
        N: CacheKey + ?Sized,
    {
        self.cluster(cluster).get(key)
    }

    pub fn get_or_save_in_cluster<T, K, N, F>(
        &self,
        key: &K,
        cluster: &N,
        ttl: Option<Duration>,
        produce: F,
    ) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        K: CacheKey + ?Sized,
        N: CacheKey + ?Sized,
        F: FnOnce() -> Option<T>,
    {
        self.cluster(cluster).get_or_save(key, ttl, produce)
    }

    pub fn save_to_cluster<T, K, N>(
        &self,
        key: &K,
        cluster: &N,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
        K: CacheKey + ?Sized,
        N: CacheKey + ?Sized,
    {
        self.cluster(cluster).save(key, value, ttl)
    }

    pub fn exists_in_cluster<K, N>(&self, key: &K, cluster: &N) -> bool
    where
        K: CacheKey + ?Sized,
        N: CacheKey + ?Sized,
    {
        self.cluster(cluster).exists(key)
    }

    pub fn delete_from_cluster<K, N>(&self, key: &K, cluster: &N) -> Result<()>
    where
        K: CacheKey + ?Sized,
        N: CacheKey + ?Sized,
    {
        self.cluster(cluster).delete(key)
    }

    /// Removes every entry ever saved under the cluster `name`, and nothing else.
    pub fn delete_all_in_cluster<N: CacheKey + ?Sized>(&self, name: &N) -> PurgeReport {
        self.cluster(name).delete_all()
    }

    /// Removes the whole cluster subtree. Plain entries are untouched.
    pub fn delete_all_clusters(&self) -> PurgeReport {
        let report = RecursiveDirectoryPurger::purge(self.clusters.clusters_root(), false);
        info!(
            "Purged all clusters: {} files, {} dirs, {} failures",
            report.files_removed, report.dirs_removed, report.failures
        );
        report
    }

    // == Namespace Operations ==
    fn get_in<T, K>(&self, namespace: &Namespace, key: &K) -> Option<T>
    where
        T: DeserializeOwned,
        K: CacheKey + ?Sized,
    {
        let path = self.entry_path(namespace, key);
        match self.storage.read(&path) {
            ReadOutcome::Hit(payload) => match serde_json::from_slice::<T>(&payload) {
                Ok(value) => {
                    self.stats.record_read();
                    Some(value)
                }
                Err(err) => {
                    debug!("Undecodable entry {}: {}", path.display(), err);
                    self.reap(&path, Reap::Corrupt);
                    None
                }
            },
            ReadOutcome::Miss => {
                self.stats.record_miss();
                None
            }
            ReadOutcome::Expired => {
                self.reap(&path, Reap::Expired);
                None
            }
            ReadOutcome::Corrupt => {
                self.reap(&path, Reap::Corrupt);
                None
            }
        }
    }

    fn get_or_save_in<T, K, F>(
        &self,
        namespace: &Namespace,
        key: &K,
        ttl: Option<Duration>,
        produce: F,
    ) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        K: CacheKey + ?Sized,
        F: FnOnce() -> Option<T>,
    {
        if let Some(value) = self.get_in(namespace, key) {
            return Some(value);
        }
        let value = produce()?;
        if let Err(err) = self.save_in(namespace, key, &value, ttl) {
            warn!("Computed value could not be cached: {}", err);
        }
        Some(value)
    }

    fn save_in<T, K>(
        &self,
        namespace: &Namespace,
        key: &K,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
        K: CacheKey + ?Sized,
    {
        let result = self.try_save(namespace, key, value, ttl);
        if let Err(err) = &result {
            warn!("Failed to save cache entry: {}", err);
        }
        self.stats.record_write(result.is_ok());
        result
    }

    fn try_save<T, K>(
        &self,
        namespace: &Namespace,
        key: &K,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
        K: CacheKey + ?Sized,
    {
        let payload = serde_json::to_vec(value)?;
        let expires_at = ExpiresAt::after(ttl.unwrap_or(self.default_ttl));

        let path = self.entry_path(namespace, key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|err| CacheError::io(dir, err))?;
        }

        self.storage.write(&path, &payload, expires_at)
    }

    fn exists_in<K: CacheKey + ?Sized>(&self, namespace: &Namespace, key: &K) -> bool {
        let path = self.entry_path(namespace, key);
        match self.storage.liveness(&path) {
            Liveness::Live(_) => true,
            Liveness::Missing => false,
            Liveness::Expired => {
                self.reap(&path, Reap::Expired);
                false
            }
        }
    }

    fn delete_in<K: CacheKey + ?Sized>(&self, namespace: &Namespace, key: &K) -> Result<()> {
        let path = self.entry_path(namespace, key);
        self.storage.remove(&path)
    }

    /// Deletes an entry discovered to be stale during a read.
    fn reap(&self, path: &Path, reason: Reap) {
        match reason {
            Reap::Expired => self.stats.record_expired(),
            Reap::Corrupt => self.stats.record_corrupt(),
        }
        self.stats.record_miss();

        match self.storage.remove(path) {
            Ok(()) => debug!("Reaped {:?} entry {}", reason, path.display()),
            Err(err) => debug!("Could not reap {}: {}", path.display(), err),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Reap {
    Expired,
    Corrupt,
}

// == Cluster View ==
/// Operations scoped to one cluster namespace.
#[derive(Debug, Clone)]
pub struct ClusterView<'a> {
    engine: &'a CacheEngine,
    namespace: Namespace,
}

impl ClusterView<'_> {
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Directory holding every entry of this cluster.
    pub fn dir(&self) -> &Path {
        self.namespace.base()
    }

    pub fn get<T, K>(&self, key: &K) -> Option<T>
    where
        T: DeserializeOwned,
        K: CacheKey + ?Sized,
    {
        self.engine.get_in(&self.namespace, key)
    }

    pub fn get_or_save<T, K, F>(&self, key: &K, ttl: Option<Duration>, produce: F) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        K: CacheKey + ?Sized,
        F: FnOnce() -> Option<T>,
    {
        self.engine
            .get_or_save_in(&self.namespace, key, ttl, produce)
    }

    pub fn save<T, K>(&self, key: &K, value: &T, ttl: Option<Duration>) -> Result<()>
    where
        T: Serialize + ?Sized,
        K: CacheKey + ?Sized,
    {
        self.engine.save_in(&self.namespace, key, value, ttl)
    }

    pub fn exists<K: CacheKey + ?Sized>(&self, key: &K) -> bool {
        self.engine.exists_in(&self.namespace, key)
    }

    pub fn delete<K: CacheKey + ?Sized>(&self, key: &K) -> Result<()> {
        self.engine.delete_in(&self.namespace, key)
    }

    /// Removes the cluster directory with everything in it.
    pub fn delete_all(&self) -> PurgeReport {
        let report = RecursiveDirectoryPurger::purge(self.dir(), false);
        info!(
            "Purged cluster {}: {} files, {} dirs, {} failures",
            self.dir().display(),
            report.files_removed,
            report.dirs_removed,
            report.failures
        );
        report
    }
}
