//! Cluster Namespace Module
//!
//! Clusters partition the keyspace into groups that can be purged as a
//! whole. Each cluster lives under `<root>/<marker>/<hash(name)>/` and mirrors
//! the plain layout one level deeper. The marker defaults to `clusters`.

use std::path::{Path, PathBuf};

use crate::cache::key::{CacheKey, Digest, KeyHasher};

/// Default name of the directory holding every cluster.
///
/// Contains non-hex characters, so it can never be mistaken for a shard level.
pub const CLUSTER_DIR: &str = "clusters";

// == Cluster Namespace ==
/// Maps cluster names to their directories under the cache root.
#[derive(Debug, Clone)]
pub struct ClusterNamespace {
    marker: String,
    clusters_root: PathBuf,
}

impl ClusterNamespace {
    /// Places clusters under `cache_dir/marker`.
    pub fn new(cache_dir: &Path, marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
            clusters_root: cache_dir.join(marker),
        }
    }

    /// Directory that contains all clusters.
    pub fn clusters_root(&self) -> &Path {
        &self.clusters_root
    }

    /// Resolves the namespace of one cluster.
    pub fn scope<K: CacheKey + ?Sized>(&self, name: &K) -> Namespace {
        let digest = KeyHasher::digest(name);
        let base = self.clusters_root.join(digest.as_str());
        Namespace::Cluster { digest, base }
    }

    /// Returns true if a root-level directory name is the cluster marker.
    pub fn is_marker(&self, name: &str) -> bool {
        name == self.marker
    }
}

// == Namespace ==
/// Base directory that shard paths are resolved under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Namespace {
    /// Plain entries directly under the cache root
    Root(PathBuf),
    /// Entries of one cluster
    Cluster { digest: Digest, base: PathBuf },
}

impl Namespace {
    pub fn base(&self) -> &Path {
        match self {
            Namespace::Root(base) => base,
            Namespace::Cluster { base, .. } => base,
        }
    }
}
