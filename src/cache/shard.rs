//! Shard Path Module
//!
//! Derives directory levels from a digest prefix so no single directory
//! collects an unbounded number of entries.

use std::path::{Path, PathBuf};

// == Shard Path Resolver ==
/// Slices the hex prefix of a digest into fixed-width directory levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardPathResolver {
    /// Characters per level
    width: usize,
    /// Number of levels
    depth: usize,
}

impl ShardPathResolver {
    pub fn new(width: usize, depth: usize) -> Self {
        Self { width, depth }
    }

    // == Segments ==
    /// Returns up to `depth` segments of `width` characters, left to right.
    ///
    /// If the digest runs out, the last segment holds whatever remains and no
    /// empty segments are produced.
    pub fn segments<'a>(&self, digest: &'a str) -> Vec<&'a str> {
        let mut segments = Vec::with_capacity(self.depth);
        let mut rest = digest;
        for _ in 0..self.depth {
            if rest.is_empty() || self.width == 0 {
                break;
            }
            let take = self.width.min(rest.len());
            let (segment, tail) = rest.split_at(take);
            segments.push(segment);
            rest = tail;
        }
        segments
    }

    // == Remainder ==
    /// Returns the part of the digest not consumed by the shard levels.
    pub fn remainder<'a>(&self, digest: &'a str) -> &'a str {
        let consumed = self.width.saturating_mul(self.depth).min(digest.len());
        &digest[consumed..]
    }

    // == Shard Directory ==
    /// Joins the shard levels of `digest` onto `base`.
    pub fn shard_dir(&self, base: &Path, digest: &str) -> PathBuf {
        let mut dir = base.to_path_buf();
        for segment in self.segments(digest) {
            dir.push(segment);
        }
        dir
    }

    /// Returns true if `name` looks like a first-level shard directory.
    ///
    /// Shard names are exactly `width` hex characters, which keeps them apart
    /// from the cluster marker and from entry names.
    pub fn is_shard_dir_name(&self, name: &str) -> bool {
        name.len() == self.width && name.chars().all(|c| c.is_ascii_hexdigit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "5d41402abc4b2a76b9719d911017c592";

    #[test]
    fn test_single_level() {
        let resolver = ShardPathResolver::new(2, 1);
        assert_eq!(resolver.segments(DIGEST), vec!["5d"]);
        assert_eq!(resolver.remainder(DIGEST), &DIGEST[2..]);
    }

    #[test]
    fn test_two_levels() {
        let resolver = ShardPathResolver::new(2, 2);
        assert_eq!(resolver.segments(DIGEST), vec!["5d", "41"]);
        assert_eq!(resolver.remainder(DIGEST), "402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_short_digest_takes_remainder() {
        let resolver = ShardPathResolver::new(2, 3);
        assert_eq!(resolver.segments("abcde"), vec!["ab", "cd", "e"]);
        assert_eq!(resolver.remainder("abcde"), "");

        let resolver = ShardPathResolver::new(2, 4);
        assert_eq!(resolver.segments("abc"), vec!["ab", "c"]);
    }

    #[test]
    fn test_shard_dir_is_deterministic() {
        let resolver = ShardPathResolver::new(2, 2);
        let base = Path::new("/var/cache/app");
        let first = resolver.shard_dir(base, DIGEST);
        let second = resolver.shard_dir(base, DIGEST);
        assert_eq!(first, second);
        assert_eq!(first, Path::new("/var/cache/app/5d/41"));
    }

    #[test]
    fn test_is_shard_dir_name() {
        let resolver = ShardPathResolver::new(2, 1);
        assert!(resolver.is_shard_dir_name("0f"));
        assert!(!resolver.is_shard_dir_name("clusters"));
        assert!(!resolver.is_shard_dir_name("zz"));
        assert!(!resolver.is_shard_dir_name("abc"));
    }
}
