//! Remaining-TTL status of a cache entry.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// The answer to "how long does this entry have left?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTtl {
    /// No such entry (or it has already expired).
    Missing,
    /// The entry exists and never expires.
    NonExpiring,
    /// The entry expires after the given duration.
    Remaining(Duration),
}

impl EntryTtl {
    /// Derives the status from a stored deadline, evaluated against `Utc::now()`.
    ///
    /// A deadline in the past maps to [`EntryTtl::Missing`]: an expired entry
    /// is observationally absent.
    pub fn from_deadline(expires_at: Option<DateTime<Utc>>) -> Self {
        match expires_at {
            None => EntryTtl::NonExpiring,
            Some(deadline) => {
                let remaining = deadline.signed_duration_since(Utc::now());
                match remaining.num_milliseconds() {
                    ms if ms > 0 => EntryTtl::Remaining(Duration::from_millis(ms as u64)),
                    _ => EntryTtl::Missing,
                }
            }
        }
    }

    /// Derives the status from a Redis `PTTL` reply.
    ///
    /// `-2` means no such key, `-1` means no expiry, any other value is the
    /// remaining time in milliseconds.
    pub fn from_pttl(pttl: i64) -> Self {
        match pttl {
            -2 => EntryTtl::Missing,
            -1 => EntryTtl::NonExpiring,
            ms if ms > 0 => EntryTtl::Remaining(Duration::from_millis(ms as u64)),
            _ => EntryTtl::Missing,
        }
    }

    /// Remaining time in milliseconds, if the entry exists and expires.
    pub fn remaining_millis(&self) -> Option<u128> {
        match self {
            EntryTtl::Remaining(duration) => Some(duration.as_millis()),
            _ => None,
        }
    }

    /// `true` when the entry exists, expiring or not.
    pub fn exists(&self) -> bool {
        !matches!(self, EntryTtl::Missing)
    }
}
