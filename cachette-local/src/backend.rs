//! The moka-backed local tier.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::future::{Cache, CacheBuilder};

use cachette_backend::{CacheBackend, DeleteStatus, LockError, LockHandle};
use cachette_core::{CacheEvent, CacheValue, EntryTtl, EventBus};

use crate::lock::LockTable;

/// Default capacity bound, in entries.
pub const DEFAULT_MAX_ITEMS: u64 = 5000;
/// Default max age applied to entries stored without an explicit TTL.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_millis(1_800_000);

/// Environment variable overriding the capacity bound.
pub const MAX_ITEMS_ENV: &str = "CACHETTE_LC_MAX_ITEMS";
/// Environment variable overriding the default max age, in milliseconds.
pub const MAX_AGE_ENV: &str = "CACHETTE_LC_MAX_AGE";

/// A stored entry: the value plus its expiry deadline, if any.
#[derive(Debug, Clone)]
struct StoredEntry {
    value: CacheValue,
    expires_at: Option<DateTime<Utc>>,
}

/// Expiration policy deriving each entry's TTL from its stored deadline.
///
/// Entries without a deadline fall back to the tier's default max age: they
/// report `NonExpiring` through `get_ttl` but are still reclaimed eventually.
struct Expiration {
    default_max_age: Duration,
}

impl Expiration {
    fn remaining(&self, entry: &StoredEntry) -> Option<Duration> {
        match entry.expires_at {
            None => Some(self.default_max_age),
            Some(deadline) => {
                let millis = deadline.signed_duration_since(Utc::now()).num_milliseconds();
                if millis <= 0 {
                    Some(Duration::ZERO)
                } else {
                    Some(Duration::from_millis(millis as u64))
                }
            }
        }
    }
}

impl Expiry<String, StoredEntry> for Expiration {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        self.remaining(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // Use the NEW entry's deadline. The default implementation would
        // keep the old one and expire rewritten entries prematurely.
        self.remaining(value)
    }
}

/// Bounded in-process cache tier with per-entry TTL and advisory locks.
///
/// # Example
///
/// ```
/// use cachette_local::LocalCache;
///
/// let cache = LocalCache::builder().max_items(10_000).build();
/// ```
pub struct LocalCache {
    cache: Cache<String, StoredEntry>,
    locks: LockTable,
    events: EventBus,
}

impl LocalCache {
    /// Creates a builder with the default capacity and max age.
    pub fn builder() -> LocalCacheBuilder {
        LocalCacheBuilder::new()
    }

    /// Creates a tier configured from the environment
    /// (`CACHETTE_LC_MAX_ITEMS`, `CACHETTE_LC_MAX_AGE`).
    pub fn from_env() -> Self {
        LocalCacheBuilder::from_env().build()
    }

    /// Reads an entry, enforcing the expiry deadline strictly.
    async fn live_entry(&self, key: &str) -> Option<StoredEntry> {
        let entry = self.cache.get(key).await?;
        if let Some(deadline) = entry.expires_at
            && deadline <= Utc::now()
        {
            // moka reclaims on its own schedule; an entry past its deadline
            // is observationally absent right now.
            self.cache.invalidate(key).await;
            return None;
        }
        Some(entry)
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    async fn get(&self, key: &str) -> Option<CacheValue> {
        let entry = self.live_entry(key).await?;
        self.events.emit(CacheEvent::Get {
            key: key.to_owned(),
            value: entry.value.clone(),
        });
        Some(entry.value)
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> bool {
        // A TTL too large for the calendar is as good as no expiry.
        let expires_at = ttl.and_then(|ttl| {
            let delta = chrono::Duration::from_std(ttl).ok()?;
            Utc::now().checked_add_signed(delta)
        });
        self.cache
            .insert(
                key.to_owned(),
                StoredEntry {
                    value: value.clone(),
                    expires_at,
                },
            )
            .await;
        self.events.emit(CacheEvent::Set {
            key: key.to_owned(),
            value: value.clone(),
        });
        true
    }

    async fn get_ttl(&self, key: &str) -> EntryTtl {
        match self.live_entry(key).await {
            Some(entry) => EntryTtl::from_deadline(entry.expires_at),
            None => EntryTtl::Missing,
        }
    }

    async fn delete(&self, key: &str) -> DeleteStatus {
        let removed = self.cache.remove(key).await;
        self.events.emit(CacheEvent::Del {
            key: key.to_owned(),
        });
        match removed {
            Some(_) => DeleteStatus::Deleted(1),
            None => DeleteStatus::Missing,
        }
    }

    async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    async fn clear_memory(&self) {
        self.clear().await;
    }

    async fn item_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    fn is_locking_supported(&self) -> bool {
        true
    }

    async fn lock(&self, name: &str, ttl: Duration, retry: bool) -> Result<LockHandle, LockError> {
        self.locks.lock(name, ttl, retry).await
    }

    async fn unlock(&self, handle: LockHandle) -> Result<(), LockError> {
        self.locks.unlock(handle);
        Ok(())
    }

    async fn has_lock(&self, prefix: &str) -> Result<bool, LockError> {
        Ok(self.locks.has_lock(prefix))
    }

    fn events(&self) -> &EventBus {
        &self.events
    }
}

/// Builder for [`LocalCache`].
pub struct LocalCacheBuilder {
    max_items: u64,
    max_age: Duration,
    lock_wait: Duration,
    lock_poll: Duration,
    events: Option<EventBus>,
}

impl LocalCacheBuilder {
    fn new() -> Self {
        LocalCacheBuilder {
            max_items: DEFAULT_MAX_ITEMS,
            max_age: DEFAULT_MAX_AGE,
            lock_wait: crate::lock::DEFAULT_LOCK_WAIT,
            lock_poll: crate::lock::DEFAULT_LOCK_POLL,
            events: None,
        }
    }

    /// Creates a builder with defaults taken from the environment.
    ///
    /// Unset or unparsable variables fall back to the built-in defaults with
    /// a logged warning.
    pub fn from_env() -> Self {
        let mut builder = Self::new();
        if let Some(max_items) = env_number(MAX_ITEMS_ENV) {
            builder.max_items = max_items;
        }
        if let Some(max_age_ms) = env_number(MAX_AGE_ENV) {
            builder.max_age = Duration::from_millis(max_age_ms);
        }
        builder
    }

    /// Capacity bound, in entries.
    pub fn max_items(mut self, max_items: u64) -> Self {
        self.max_items = max_items;
        self
    }

    /// Max age applied to entries stored without an explicit TTL.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Bound on how long a lock acquisition may wait before failing with
    /// [`LockError::Timeout`]. Default: 2 s.
    pub fn lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    /// Polling interval while waiting for a held lock. Default: 10 ms.
    pub fn lock_poll(mut self, lock_poll: Duration) -> Self {
        self.lock_poll = lock_poll;
        self
    }

    /// Reports on the given bus instead of a fresh one.
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Builds the tier.
    pub fn build(self) -> LocalCache {
        let cache = CacheBuilder::new(self.max_items)
            .expire_after(Expiration {
                default_max_age: self.max_age,
            })
            .build();
        LocalCache {
            cache,
            locks: LockTable::new(self.lock_poll, self.lock_wait),
            events: self.events.unwrap_or_default(),
        }
    }
}

impl Default for LocalCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "unparsable environment override ignored");
            None
        }
    }
}
