//! Key Hashing Module
//!
//! Reduces caller keys to a canonical byte form and hashes them to the
//! fixed-length hex digest used for addressing entries on disk.

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;

use crate::error::Result;

/// Length of a digest in hex characters.
pub const DIGEST_LEN: usize = 32;

// == Cache Key ==
/// A value that can address a cache entry.
///
/// Two keys with the same canonical bytes address the same entry. The
/// original key is never stored, only its digest.
pub trait CacheKey {
    /// Returns the canonical byte form that gets hashed.
    fn canonical_bytes(&self) -> Cow<'_, [u8]>;
}

impl CacheKey for str {
    fn canonical_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl CacheKey for String {
    fn canonical_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl<K: CacheKey + ?Sized> CacheKey for &K {
    fn canonical_bytes(&self) -> Cow<'_, [u8]> {
        (**self).canonical_bytes()
    }
}

macro_rules! impl_cache_key_display {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CacheKey for $ty {
                fn canonical_bytes(&self) -> Cow<'_, [u8]> {
                    Cow::Owned(self.to_string().into_bytes())
                }
            }
        )*
    };
}

impl_cache_key_display!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

// == Structured Key ==
/// A key built from an arbitrary serializable structure.
///
/// The structure is serialized once with serde_json on construction, so
/// hashing stays infallible. Structures containing unordered maps should use
/// ordered collections to keep the serialized form deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredKey {
    bytes: Vec<u8>,
}

impl StructuredKey {
    /// Serializes `value` into its canonical form.
    pub fn new<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self {
            bytes: serde_json::to_vec(value)?,
        })
    }
}

impl CacheKey for StructuredKey {
    fn canonical_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.bytes)
    }
}

// == Digest ==
/// Fixed-length lowercase hex digest of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// == Key Hasher ==
/// Hashes canonical key bytes with MD5.
///
/// The hash only needs to spread keys evenly across shard directories;
/// collisions are accepted as a working assumption.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyHasher;

impl KeyHasher {
    /// Digest of a key.
    pub fn digest<K: CacheKey + ?Sized>(key: &K) -> Digest {
        Self::digest_bytes(&key.canonical_bytes())
    }

    /// Digest of raw canonical bytes.
    pub fn digest_bytes(bytes: &[u8]) -> Digest {
        Digest(format!("{:x}", md5::compute(bytes)))
    }
}
