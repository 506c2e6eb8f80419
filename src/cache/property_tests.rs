//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the engine's storage properties against real
//! temporary directories, in both storage modes.

use proptest::prelude::*;
use std::thread::sleep;
use std::time::Duration;

use tempfile::TempDir;

use crate::cache::{CacheEngine, ChunkedNameCodec, KeyHasher, StorageMode};
use crate::config::Config;

// == Strategies ==
/// Generates cache keys of mixed characters
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_:./ -]{1,64}".prop_map(|s| s)
}

/// Generates values that fit into a default chunked entry
fn value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,256}".prop_map(|s| s)
}

fn mode_strategy() -> impl Strategy<Value = StorageMode> {
    prop_oneof![Just(StorageMode::SingleFile), Just(StorageMode::Chunked)]
}

/// Generates a sequence of cache operations for testing
#[derive(Debug, Clone)]
enum CacheOp {
    Save { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    // A small key space so operations collide
    let key = "[a-d]{1,2}";
    prop_oneof![
        (key, value_strategy()).prop_map(|(key, value)| CacheOp::Save { key, value }),
        key.prop_map(|key| CacheOp::Get { key }),
        key.prop_map(|key| CacheOp::Delete { key }),
    ]
}

fn open(mode: StorageMode) -> (TempDir, CacheEngine) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::for_mode(mode).with_cache_dir(dir.path());
    let engine = CacheEngine::open(&config).unwrap();
    (dir, engine)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    // Round-trip: a saved value is returned unchanged before it expires.
    #[test]
    fn prop_roundtrip_storage(
        mode in mode_strategy(),
        key in key_strategy(),
        value in value_strategy()
    ) {
        let (_dir, engine) = open(mode);

        engine.save(key.as_str(), &value, None).unwrap();

        let retrieved: Option<String> = engine.get(key.as_str());
        prop_assert_eq!(retrieved, Some(value), "Round-trip value mismatch");
    }

    // Delete: after deleting a key it is neither readable nor present on disk.
    #[test]
    fn prop_delete_removes_entry(
        mode in mode_strategy(),
        key in key_strategy(),
        value in value_strategy()
    ) {
        let (_dir, engine) = open(mode);
        let path = engine.entry_path(&engine.root_namespace(), key.as_str());

        engine.save(key.as_str(), &value, None).unwrap();
        prop_assert!(path.exists(), "Entry should be on disk before delete");

        engine.delete(key.as_str()).unwrap();

        prop_assert!(!path.exists(), "Entry should be gone after delete");
        prop_assert!(engine.get::<String, _>(key.as_str()).is_none());
    }

    // Overwrite: the last save wins.
    #[test]
    fn prop_overwrite_semantics(
        mode in mode_strategy(),
        key in key_strategy(),
        value1 in value_strategy(),
        value2 in value_strategy()
    ) {
        let (_dir, engine) = open(mode);

        engine.save(key.as_str(), &value1, None).unwrap();
        engine.save(key.as_str(), &value2, None).unwrap();

        let retrieved: Option<String> = engine.get(key.as_str());
        prop_assert_eq!(retrieved, Some(value2), "Overwrite should return new value");
    }

    // Statistics: the read counter equals the number of hits in any op sequence.
    #[test]
    fn prop_read_count_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..40)) {
        let (_dir, engine) = open(StorageMode::SingleFile);
        let mut expected_reads: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Save { key, value } => {
                    engine.save(key.as_str(), &value, None).unwrap();
                }
                CacheOp::Get { key } => {
                    if engine.get::<String, _>(key.as_str()).is_some() {
                        expected_reads += 1;
                    }
                }
                CacheOp::Delete { key } => {
                    engine.delete(key.as_str()).unwrap();
                }
            }
        }

        prop_assert_eq!(engine.read_count(), expected_reads, "Read count mismatch");
    }

    // Sharding: a key always maps to the same path, under its digest prefix.
    #[test]
    fn prop_shard_path_deterministic(key in key_strategy()) {
        let (dir, first) = open(StorageMode::SingleFile);
        let config = Config::for_mode(StorageMode::SingleFile).with_cache_dir(dir.path());
        let second = CacheEngine::open(&config).unwrap();

        let path = first.entry_path(&first.root_namespace(), key.as_str());
        prop_assert_eq!(&path, &second.entry_path(&second.root_namespace(), key.as_str()));

        let digest = KeyHasher::digest(key.as_str());
        let shard = path.parent().unwrap();
        prop_assert_eq!(shard.file_name().unwrap().to_str().unwrap(), &digest.as_str()[..2]);
        prop_assert_eq!(shard.parent().unwrap(), first.cache_dir());
    }

    // Clusters: the same key in the root and in a cluster holds separate values.
    #[test]
    fn prop_cluster_isolation(
        key in key_strategy(),
        cluster in key_strategy(),
        plain in value_strategy(),
        clustered in value_strategy()
    ) {
        let (_dir, engine) = open(StorageMode::SingleFile);

        engine.save(key.as_str(), &plain, None).unwrap();
        engine.save_to_cluster(key.as_str(), cluster.as_str(), &clustered, None).unwrap();

        prop_assert_eq!(engine.get::<String, _>(key.as_str()), Some(plain.clone()));
        prop_assert_eq!(
            engine.get_from_cluster::<String, _, _>(key.as_str(), cluster.as_str()),
            Some(clustered)
        );

        engine.delete_all_in_cluster(cluster.as_str());
        prop_assert!(!engine.exists_in_cluster(key.as_str(), cluster.as_str()));
        prop_assert_eq!(engine.get::<String, _>(key.as_str()), Some(plain));
    }

    // Chunk names: decoding the produced names yields the payload, and no
    // name exceeds ordinal + separator + chunk size or contains a slash.
    #[test]
    fn prop_chunk_names_well_formed(payload in prop::collection::vec(any::<u8>(), 0..1100)) {
        let codec = ChunkedNameCodec::new(248, 6);
        let names = codec.encode(&payload).unwrap();

        prop_assert!(!names.is_empty() && names.len() <= 6);
        for name in &names {
            prop_assert!(!name.contains('/'), "Chunk name contains a slash: {}", name);
            prop_assert!(name.len() <= 2 + 248);
        }
        prop_assert_eq!(codec.decode(names.iter().rev()), Some(payload));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    // Capacity: a chunked save succeeds iff the encoded payload fits, and a
    // rejected save leaves no entry directory behind.
    #[test]
    fn prop_chunked_capacity_boundary(len in 1000usize..1200) {
        let (_dir, engine) = open(StorageMode::Chunked);
        let value = "x".repeat(len);
        // JSON string payload carries two quote bytes
        let fits = ChunkedNameCodec::encoded_len(len + 2) <= 248 * 6;

        let result = engine.save("big", &value, None);
        let path = engine.entry_path(&engine.root_namespace(), "big");

        if fits {
            prop_assert!(result.is_ok());
            prop_assert_eq!(engine.get::<String, _>("big"), Some(value));
        } else {
            prop_assert!(result.unwrap_err().is_capacity_exceeded());
            prop_assert!(!path.exists(), "Rejected save left {} behind", path.display());
        }
    }
}

// Separate proptest block with fewer cases for time-sensitive TTL tests
proptest! {
    #![proptest_config(ProptestConfig::with_cases(3))]

    // Expiry: an entry saved with a 2s TTL is a miss after the TTL and is
    // removed from disk by the read that discovers it.
    #[test]
    fn prop_ttl_expiration_behavior(
        mode in mode_strategy(),
        key in key_strategy(),
        value in value_strategy()
    ) {
        let (_dir, engine) = open(mode);
        let path = engine.entry_path(&engine.root_namespace(), key.as_str());

        engine.save(key.as_str(), &value, Some(Duration::from_secs(2))).unwrap();
        prop_assert_eq!(engine.get::<String, _>(key.as_str()), Some(value));

        // Wait past the expiry instant
        sleep(Duration::from_millis(2100));

        prop_assert!(engine.get::<String, _>(key.as_str()).is_none());
        prop_assert!(!path.exists(), "Expired entry should be reaped");
    }
}
