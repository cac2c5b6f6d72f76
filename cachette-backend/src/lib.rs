#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod backend;
pub mod codec;
pub mod test_util;
mod tiered;

pub use backend::{CacheBackend, LOCK_NAME_PREFIX, LockHandle, lock_name};
pub use tiered::{METRICS_PERIOD_ENV, TieredCache, TieredCacheBuilder};

use thiserror::Error;

/// Infrastructure failure inside a cache tier.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Network or store-level failure (connection, stream, timeout).
    ///
    /// Read/write paths swallow this into warning events; it only surfaces
    /// from operations that must not degrade silently, such as
    /// `wait_for_replication`.
    #[error("cache transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The operation is not available on this tier.
    #[error("`{0}` is not supported by this cache tier")]
    UnsupportedOperation(&'static str),
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Failure of an advisory lock operation. Always propagated to the caller.
#[derive(Debug, Error)]
pub enum LockError {
    /// A process-local lock acquisition waited past its bound.
    #[error("timed out after {waited_ms} ms waiting for lock `{name}`")]
    Timeout {
        /// The lock name being waited on.
        name: String,
        /// How long the caller waited, in milliseconds.
        waited_ms: u64,
    },

    /// A distributed lock could not be acquired within the retry budget.
    #[error("lock `{name}` still unavailable after {attempts} attempt(s)")]
    Unavailable {
        /// The lock name being acquired.
        name: String,
        /// Number of acquisition attempts made.
        attempts: u32,
    },

    /// The underlying store failed while manipulating the lock.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Status of a delete operation.
#[derive(Debug, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Entries were deleted.
    Deleted(u32),
    /// The key was already missing.
    Missing,
}

impl DeleteStatus {
    /// `true` when at least one entry was removed.
    pub fn was_deleted(&self) -> bool {
        matches!(self, DeleteStatus::Deleted(_))
    }
}
