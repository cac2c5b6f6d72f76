//! The coordinator's error type.

use std::sync::Arc;

use thiserror::Error;

use cachette_backend::LockError;
use cachette_core::{CacheableError, KeyError};

/// Failure of a coordinated cache operation.
///
/// The type is `Clone` because a single settlement is broadcast to every
/// caller attached to the same in-flight fetch.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The computation failed - freshly, or replayed from a cached error
    /// entry.
    #[error(transparent)]
    Compute(#[from] CacheableError),

    /// The distributed lock around the fetch could not be acquired or
    /// released.
    #[error("distributed lock failure: {0}")]
    Lock(Arc<LockError>),

    /// The cache key could not be built.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The fetch task died before settling (runtime shutdown, panic).
    #[error("cache fetch task did not settle")]
    Aborted,
}

impl From<LockError> for CacheError {
    fn from(error: LockError) -> Self {
        CacheError::Lock(Arc::new(error))
    }
}

impl CacheError {
    /// The computation error, when that is what failed.
    pub fn as_compute(&self) -> Option<&CacheableError> {
        match self {
            CacheError::Compute(error) => Some(error),
            _ => None,
        }
    }
}
