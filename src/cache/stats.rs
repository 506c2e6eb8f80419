//! Cache Statistics Module
//!
//! Per-engine counters for reads, misses, reaped entries and writes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Snapshot of the engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Successful decodes (the read counter)
    pub reads: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Entries deleted on read because their TTL had passed
    pub expired: u64,
    /// Entries deleted on read because they failed to decode
    pub corrupt: u64,
    /// Successful saves
    pub writes: u64,
    /// Saves that returned an error
    pub write_failures: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Returns reads / (reads + misses), or 0.0 if no lookups were made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.reads + self.misses;
        if total == 0 {
            0.0
        } else {
            self.reads as f64 / total as f64
        }
    }
}

// == Stats Recorder ==
/// Lock-free counters owned by one engine instance.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    reads: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    corrupt: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt(&self) {
        self.corrupt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, ok: bool) {
        if ok {
            self.writes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            reads: self.reads.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}
