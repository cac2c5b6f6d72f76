//! In-memory counting backend for tests.
//!
//! Used by this crate's tiered-cache tests and by downstream crates to
//! observe exactly which tier operations ran, with what TTLs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use cachette_core::{CacheValue, EntryTtl, EventBus};

use crate::backend::CacheBackend;
use crate::DeleteStatus;

/// Operation counters for a [`RecordingBackend`].
#[derive(Debug, Default)]
pub struct BackendCounters {
    /// Number of `get` calls.
    pub get_count: AtomicUsize,
    /// Number of `set` calls.
    pub set_count: AtomicUsize,
    /// Number of `delete` calls.
    pub delete_count: AtomicUsize,
}

/// A `DashMap`-backed backend that records every operation.
///
/// TTLs are stored but do not count down; tests that need a specific
/// `get_ttl` reply can pin one with [`RecordingBackend::reply_ttl`].
#[derive(Clone, Default)]
pub struct RecordingBackend {
    store: Arc<DashMap<String, (CacheValue, Option<Duration>)>>,
    ttl_replies: Arc<DashMap<String, EntryTtl>>,
    counters: Arc<BackendCounters>,
    events: EventBus,
}

impl RecordingBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates an entry without counting a `set`.
    pub fn seed(&self, key: &str, value: CacheValue, ttl: Option<Duration>) {
        self.store.insert(key.to_owned(), (value, ttl));
    }

    /// Pins the `get_ttl` reply for a key.
    pub fn reply_ttl(&self, key: &str, ttl: EntryTtl) {
        self.ttl_replies.insert(key.to_owned(), ttl);
    }

    /// The TTL passed to the most recent `set` of `key`, if any.
    pub fn last_set_ttl(&self, key: &str) -> Option<Option<Duration>> {
        self.store.get(key).map(|entry| entry.value().1)
    }

    /// Number of `get` calls so far.
    pub fn get_count(&self) -> usize {
        self.counters.get_count.load(Ordering::SeqCst)
    }

    /// Number of `set` calls so far.
    pub fn set_count(&self) -> usize {
        self.counters.set_count.load(Ordering::SeqCst)
    }

    /// Number of `delete` calls so far.
    pub fn delete_count(&self) -> usize {
        self.counters.delete_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheBackend for RecordingBackend {
    async fn get(&self, key: &str) -> Option<CacheValue> {
        self.counters.get_count.fetch_add(1, Ordering::SeqCst);
        self.store.get(key).map(|entry| entry.value().0.clone())
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> bool {
        self.counters.set_count.fetch_add(1, Ordering::SeqCst);
        self.store.insert(key.to_owned(), (value.clone(), ttl));
        true
    }

    async fn get_ttl(&self, key: &str) -> EntryTtl {
        if let Some(reply) = self.ttl_replies.get(key) {
            return *reply.value();
        }
        match self.store.get(key) {
            Some(entry) => match entry.value().1 {
                Some(ttl) => EntryTtl::Remaining(ttl),
                None => EntryTtl::NonExpiring,
            },
            None => EntryTtl::Missing,
        }
    }

    async fn delete(&self, key: &str) -> DeleteStatus {
        self.counters.delete_count.fetch_add(1, Ordering::SeqCst);
        match self.store.remove(key) {
            Some(_) => DeleteStatus::Deleted(1),
            None => DeleteStatus::Missing,
        }
    }

    async fn clear(&self) {
        self.store.clear();
    }

    async fn clear_memory(&self) {
        self.store.clear();
    }

    async fn item_count(&self) -> u64 {
        self.store.len() as u64
    }

    fn events(&self) -> &EventBus {
        &self.events
    }
}
