//! Expiry Module
//!
//! Entry liveness is an absolute Unix timestamp resolved at write time. It is
//! stored as the modification time of the entry file or directory, or as a
//! leading header line when mtimes cannot be trusted across copies.

use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use filetime::FileTime;

/// Separates the expiry header from the payload.
const HEADER_TERMINATOR: u8 = b'\n';

/// Longest header we try to parse (an i64 plus sign).
const MAX_HEADER_LEN: usize = 20;

// == Expires At ==
/// Absolute expiry instant, kept at the precision of file modification times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExpiresAt(DateTime<Utc>);

impl ExpiresAt {
    pub fn from_unix_seconds(seconds: i64) -> Self {
        Self::from_parts(seconds, 0)
    }

    /// Builds an instant from seconds and nanoseconds. Out-of-range values clamp.
    fn from_parts(seconds: i64, nanos: u32) -> Self {
        let at = DateTime::from_timestamp(seconds, nanos).unwrap_or(if seconds < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        });
        Self(at)
    }

    /// Resolves `now + ttl` from the sub-second clock, so the full TTL is
    /// always available no matter where in the current second the save happens.
    pub fn after(ttl: Duration) -> Self {
        Self::after_from(Utc::now(), ttl)
    }

    fn after_from(now: DateTime<Utc>, ttl: Duration) -> Self {
        let at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self(at)
    }

    /// Reads the expiry stored as the modification time of `metadata`.
    pub fn from_mtime(metadata: &Metadata) -> Self {
        let mtime = FileTime::from_last_modification_time(metadata);
        Self::from_parts(mtime.unix_seconds(), mtime.nanoseconds())
    }

    /// Whole seconds, rounded down.
    pub fn unix_seconds(&self) -> i64 {
        self.0.timestamp()
    }

    /// Whole seconds, rounded up so a truncated copy never expires early.
    pub fn unix_seconds_ceil(&self) -> i64 {
        let seconds = self.0.timestamp();
        if self.0.timestamp_subsec_nanos() > 0 {
            seconds.saturating_add(1)
        } else {
            seconds
        }
    }

    // == Is Expired ==
    /// An entry is expired once the current time reaches its expiry.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.0 <= now
    }

    /// True if the expiry passed, but less than `window` ago.
    pub fn expired_within(&self, window: Duration) -> bool {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.is_expired_at(now) && self.0 > cutoff
    }

    /// Remaining lifetime in seconds (rounded up), zero once expired.
    pub fn ttl_remaining(&self) -> u64 {
        let remaining = self.0.signed_duration_since(Utc::now());
        let Ok(remaining) = remaining.to_std() else {
            return 0;
        };
        let mut seconds = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            seconds = seconds.saturating_add(1);
        }
        seconds
    }

    // == Apply ==
    /// Stamps the expiry onto `path` as its modification time.
    pub fn apply_to(&self, path: &Path) -> io::Result<()> {
        filetime::set_file_mtime(
            path,
            FileTime::from_unix_time(self.0.timestamp(), self.0.timestamp_subsec_nanos()),
        )
    }

    // == Header ==
    /// Prepends `<expiry>\n` to `payload`. The header holds whole seconds.
    pub fn encode_header(&self, payload: &[u8]) -> Vec<u8> {
        let header = self.unix_seconds_ceil().to_string();
        let mut bytes = Vec::with_capacity(header.len() + 1 + payload.len());
        bytes.extend_from_slice(header.as_bytes());
        bytes.push(HEADER_TERMINATOR);
        bytes.extend_from_slice(payload);
        bytes
    }

    /// Splits a leading `<expiry>\n` header from the payload.
    pub fn split_header(bytes: &[u8]) -> Option<(Self, &[u8])> {
        let end = bytes
            .iter()
            .take(MAX_HEADER_LEN + 1)
            .position(|b| *b == HEADER_TERMINATOR)?;
        let header = std::str::from_utf8(&bytes[..end]).ok()?;
        let seconds = header.parse::<i64>().ok()?;
        Some((Self::from_unix_seconds(seconds), &bytes[end + 1..]))
    }
}

impl fmt::Display for ExpiresAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// == Expiry Source ==
/// Where a single-file entry keeps its expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpirySource {
    /// File modification time only
    #[default]
    Mtime,
    /// Leading `<expiryEpochSeconds>\n` line in the content
    Header,
}

impl FromStr for ExpirySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mtime" => Ok(ExpirySource::Mtime),
            "header" => Ok(ExpirySource::Header),
            other => Err(format!("unknown expiry source '{}'", other)),
        }
    }
}

// == Liveness ==
/// Result of checking an entry without decoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Missing,
    Live(ExpiresAt),
    Expired,
}

impl Liveness {
    pub fn is_live(&self) -> bool {
        matches!(self, Liveness::Live(_))
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in seconds.
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}
