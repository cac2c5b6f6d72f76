//! The uniform tier contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cachette_core::{CacheValue, EntryTtl, EventBus};

use crate::{BackendError, BackendResult, DeleteStatus, LockError};

/// Namespace prefix for advisory lock names.
///
/// The single-flight layer names its locks `lock__{cache key}`, and
/// [`CacheBackend::has_lock`] indexes this namespace: `has_lock(p)` answers
/// whether any live lock named `lock__{p}...` exists.
pub const LOCK_NAME_PREFIX: &str = "lock__";

/// Builds the advisory lock name for a cache key.
pub fn lock_name(key: &str) -> String {
    format!("{LOCK_NAME_PREFIX}{key}")
}

/// An opaque handle proving ownership of an advisory lock.
///
/// The handle is required for release; releasing an expired handle is a
/// no-op, since the lock may already have been reclaimed by another caller.
#[derive(Debug, Clone)]
pub struct LockHandle {
    name: String,
    token: String,
    expires_at: DateTime<Utc>,
}

impl LockHandle {
    /// Creates a handle. Tiers call this after a successful acquisition.
    pub fn new(name: impl Into<String>, token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        LockHandle {
            name: name.into(),
            token: token.into(),
            expires_at,
        }
    }

    /// The lock name this handle is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The acquisition token distinguishing this holder from later ones.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// When the underlying lock lapses.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `true` once the lock TTL has lapsed.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// The uniform contract implemented by every cache tier.
///
/// # Error policy
///
/// `get`, `set`, `get_ttl` and `delete` never propagate infrastructure
/// errors: tiers degrade to absence / `false` / absence / `Missing` and emit
/// `warn` events instead, so a flaky store cannot crash the host process.
/// Lock operations and `wait_for_replication` do propagate.
///
/// # Locking
///
/// The advisory-lock surface is optional. Tiers that do not support it keep
/// the default implementations, which report `is_locking_supported() == false`
/// and fail with [`BackendError::UnsupportedOperation`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Reads a value. `None` means no such entry (or it expired).
    async fn get(&self, key: &str) -> Option<CacheValue>;

    /// Writes a value with an optional time-to-live.
    ///
    /// `None` means the entry never expires. Returns `true` on success.
    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> bool;

    /// Reports the remaining TTL of an entry, with millisecond precision.
    async fn get_ttl(&self, key: &str) -> EntryTtl;

    /// Deletes an entry.
    async fn delete(&self, key: &str) -> DeleteStatus;

    /// Removes every entry from the tier.
    async fn clear(&self);

    /// Removes in-process state only.
    ///
    /// Identical to [`clear`](Self::clear) for local tiers; a no-op for
    /// remote tiers.
    async fn clear_memory(&self);

    /// Number of live entries in the tier.
    async fn item_count(&self) -> u64;

    /// Waits for pending writes to reach `replicas` replicas, returning the
    /// number that acknowledged. Tiers without replication acknowledge zero.
    async fn wait_for_replication(&self, replicas: u32, timeout: Duration) -> BackendResult<u32> {
        let _ = (replicas, timeout);
        Ok(0)
    }

    /// Whether the advisory-lock surface is available on this tier.
    fn is_locking_supported(&self) -> bool {
        false
    }

    /// Acquires the named advisory lock for `ttl`.
    ///
    /// With `retry`, acquisition waits (bounded) for the lock to free up;
    /// without it, a held lock fails the call immediately.
    async fn lock(&self, name: &str, ttl: Duration, retry: bool) -> Result<LockHandle, LockError> {
        let _ = (name, ttl, retry);
        Err(BackendError::UnsupportedOperation("lock").into())
    }

    /// Releases a previously acquired lock. No-op for expired handles.
    async fn unlock(&self, handle: LockHandle) -> Result<(), LockError> {
        let _ = handle;
        Err(BackendError::UnsupportedOperation("unlock").into())
    }

    /// Reports whether any live lock named `lock__{prefix}...` exists.
    async fn has_lock(&self, prefix: &str) -> Result<bool, LockError> {
        let _ = prefix;
        Err(BackendError::UnsupportedOperation("has_lock").into())
    }

    /// The event bus this tier reports on.
    fn events(&self) -> &EventBus;
}

#[async_trait]
impl<T: CacheBackend + ?Sized> CacheBackend for Arc<T> {
    async fn get(&self, key: &str) -> Option<CacheValue> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> bool {
        (**self).set(key, value, ttl).await
    }

    async fn get_ttl(&self, key: &str) -> EntryTtl {
        (**self).get_ttl(key).await
    }

    async fn delete(&self, key: &str) -> DeleteStatus {
        (**self).delete(key).await
    }

    async fn clear(&self) {
        (**self).clear().await
    }

    async fn clear_memory(&self) {
        (**self).clear_memory().await
    }

    async fn item_count(&self) -> u64 {
        (**self).item_count().await
    }

    async fn wait_for_replication(&self, replicas: u32, timeout: Duration) -> BackendResult<u32> {
        (**self).wait_for_replication(replicas, timeout).await
    }

    fn is_locking_supported(&self) -> bool {
        (**self).is_locking_supported()
    }

    async fn lock(&self, name: &str, ttl: Duration, retry: bool) -> Result<LockHandle, LockError> {
        (**self).lock(name, ttl, retry).await
    }

    async fn unlock(&self, handle: LockHandle) -> Result<(), LockError> {
        (**self).unlock(handle).await
    }

    async fn has_lock(&self, prefix: &str) -> Result<bool, LockError> {
        (**self).has_lock(prefix).await
    }

    fn events(&self) -> &EventBus {
        (**self).events()
    }
}
