//! The single-flight coordinator.
//!
//! `get_or_fetch` guarantees at most one concurrent computation per key
//! inside a process: the first caller to miss installs an in-flight record,
//! every other caller attaches to it, and all of them observe the same
//! settlement. With a lock TTL configured and a tier that supports locking,
//! a distributed lock plus a second cache read inside the critical section
//! extend the at-most-one guarantee across processes.
//!
//! The fetch itself runs on a spawned task, so a caller going away cannot
//! orphan the in-flight record or cancel the computation for the callers
//! still attached.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::TryFutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::RecvError;

use cachette_backend::{BackendResult, CacheBackend, DeleteStatus, LockHandle, lock_name};
use cachette_core::{CacheValue, CacheableError, EntryTtl, EventBus};

use crate::cached::{CachedBuilder, ComputeFn};
use crate::error::CacheError;

/// What every caller attached to a fetch receives.
type FetchOutcome = Result<Option<CacheValue>, CacheError>;

/// A clonable, multi-awaitable view of one fetch's settlement.
type SettlementFuture = Shared<BoxFuture<'static, Result<FetchOutcome, Arc<RecvError>>>>;

/// Predicate deciding whether a computation error becomes a cache entry.
pub type ErrorPredicate = Arc<dyn Fn(&CacheableError) -> bool + Send + Sync>;

/// Options for [`Cachette::get_or_fetch_with`].
#[derive(Clone, Default)]
pub struct FetchOptions {
    lock_ttl: Option<Duration>,
    should_cache_error: Option<ErrorPredicate>,
}

impl FetchOptions {
    /// No lock, no error caching.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes the fetch across processes with a distributed lock named
    /// `lock__{key}`, held for `ttl`. Ignored on tiers without locking
    /// support.
    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }

    /// Caches computation errors for which `predicate` holds, and rethrows
    /// cached errors on later reads made with error caching enabled.
    pub fn cache_errors_if(mut self, predicate: ErrorPredicate) -> Self {
        self.should_cache_error = Some(predicate);
        self
    }

    /// Caches every computation error.
    pub fn cache_all_errors(self) -> Self {
        self.cache_errors_if(Arc::new(|_| true))
    }

    fn error_caching(&self) -> bool {
        self.should_cache_error.is_some()
    }
}

struct Inner<B> {
    backend: B,
    flights: DashMap<String, SettlementFuture>,
}

/// A cache tier plus the single-flight coordination layer.
///
/// `Cachette` is cheaply clonable; clones share the tier and the in-flight
/// table.
pub struct Cachette<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for Cachette<B> {
    fn clone(&self) -> Self {
        Cachette {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B> Cachette<B>
where
    B: CacheBackend + 'static,
{
    /// Wraps a tier with the coordination layer.
    pub fn new(backend: B) -> Self {
        Cachette {
            inner: Arc::new(Inner {
                backend,
                flights: DashMap::new(),
            }),
        }
    }

    /// The underlying tier.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// The tier's event bus.
    pub fn events(&self) -> &EventBus {
        self.inner.backend.events()
    }

    /// Tier read without fetching.
    pub async fn get(&self, key: &str) -> Option<CacheValue> {
        self.inner.backend.get(key).await
    }

    /// Tier write. `ttl_seconds == 0` means no expiration.
    pub async fn set(&self, key: &str, value: &CacheValue, ttl_seconds: u64) -> bool {
        self.inner.backend.set(key, value, seconds(ttl_seconds)).await
    }

    /// Remaining TTL of an entry.
    pub async fn get_ttl(&self, key: &str) -> EntryTtl {
        self.inner.backend.get_ttl(key).await
    }

    /// Deletes an entry.
    pub async fn delete(&self, key: &str) -> DeleteStatus {
        self.inner.backend.delete(key).await
    }

    /// Delegates to the tier's replication wait.
    pub async fn wait_for_replication(&self, replicas: u32, timeout: Duration) -> BackendResult<u32> {
        self.inner.backend.wait_for_replication(replicas, timeout).await
    }

    /// Coalescing read-through: returns the cached value for `key` or
    /// computes, stores and returns it, with at most one concurrent
    /// `compute` per key in this process.
    ///
    /// `ttl_seconds == 0` stores without expiration. A `compute` returning
    /// `Ok(None)` stores nothing; that caller (and every attached waiter)
    /// receives `None` and a later call computes again.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl_seconds: u64,
        compute: F,
    ) -> Result<Option<CacheValue>, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<CacheValue>, CacheableError>> + Send + 'static,
    {
        self.get_or_fetch_with(key, ttl_seconds, compute, FetchOptions::new())
            .await
    }

    /// [`get_or_fetch`](Self::get_or_fetch) with distributed locking and
    /// error-caching options.
    ///
    /// # Error handling
    ///
    /// A cached error entry rethrows on calls made with error caching
    /// enabled and reads as absent otherwise, so an error-caching invocation
    /// and a plain one can share a key. A fresh computation error reaches
    /// every attached caller; it becomes a cache entry only when the
    /// configured predicate holds for it.
    pub async fn get_or_fetch_with<F, Fut>(
        &self,
        key: &str,
        ttl_seconds: u64,
        compute: F,
        options: FetchOptions,
    ) -> Result<Option<CacheValue>, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<CacheValue>, CacheableError>> + Send + 'static,
    {
        match self.inner.backend.get(key).await {
            Some(CacheValue::Error(error)) => {
                if options.error_caching() {
                    return Err(CacheError::Compute(error));
                }
                // A plain call reads a stored error as absence and
                // recomputes.
            }
            Some(value) => return Ok(Some(value)),
            None => {}
        }

        let settlement = match self.inner.flights.entry(key.to_owned()) {
            Entry::Occupied(record) => record.get().clone(),
            Entry::Vacant(slot) => {
                let settlement = spawn_fetch(
                    Arc::clone(&self.inner),
                    key.to_owned(),
                    seconds(ttl_seconds),
                    options,
                    compute,
                );
                slot.insert(settlement.clone());
                settlement
            }
        };

        match settlement.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CacheError::Aborted),
        }
    }

    /// Starts building a cached computation bound to this cache.
    pub fn cached(
        &self,
        name: impl Into<String>,
        ttl_seconds: u64,
        compute: ComputeFn,
    ) -> CachedBuilder<B> {
        CachedBuilder::new(self.clone(), name.into(), ttl_seconds, compute)
    }
}

fn seconds(ttl_seconds: u64) -> Option<Duration> {
    (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds))
}

/// Runs the fetch on its own task and hands back a shared settlement future.
///
/// Spawning decouples the fetch from caller lifetimes: the influx of waiters
/// can come and go, the record is removed and the lock released exactly once
/// when the fetch settles.
fn spawn_fetch<B, F, Fut>(
    inner: Arc<Inner<B>>,
    key: String,
    ttl: Option<Duration>,
    options: FetchOptions,
    compute: F,
) -> SettlementFuture
where
    B: CacheBackend + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<CacheValue>, CacheableError>> + Send + 'static,
{
    let (sender, receiver) = oneshot::channel::<FetchOutcome>();
    let settlement: SettlementFuture = receiver.map_err(Arc::new).boxed().shared();

    tokio::spawn(async move {
        let (outcome, lock) = run_fetch(&inner, &key, ttl, &options, compute).await;

        // Removal first, then unlock: late arrivals must observe the cache,
        // and the critical section must cover the store.
        inner.flights.remove(&key);
        if let Some(handle) = lock {
            if let Err(error) = inner.backend.unlock(handle).await {
                inner.backend.events().warn(
                    format!("failed to release lock for key `{key}`"),
                    Some(error.to_string()),
                );
            }
        }
        let _ = sender.send(outcome);
    });

    settlement
}

/// The fetch itself: optional lock, second check, compute, store-by-policy.
///
/// Returns the held lock instead of releasing it so the caller controls
/// release ordering relative to in-flight record removal.
async fn run_fetch<B, F, Fut>(
    inner: &Inner<B>,
    key: &str,
    ttl: Option<Duration>,
    options: &FetchOptions,
    compute: F,
) -> (FetchOutcome, Option<LockHandle>)
where
    B: CacheBackend,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<Option<CacheValue>, CacheableError>> + Send,
{
    let mut held: Option<LockHandle> = None;

    if let Some(lock_ttl) = options.lock_ttl
        && lock_ttl > Duration::ZERO
        && inner.backend.is_locking_supported()
    {
        match inner.backend.lock(&lock_name(key), lock_ttl, true).await {
            Ok(handle) => held = Some(handle),
            Err(error) => return (Err(error.into()), None),
        }

        // Second check: another process may have computed and stored while
        // we were waiting for the lock.
        match inner.backend.get(key).await {
            Some(CacheValue::Error(error)) if options.error_caching() => {
                return (Err(CacheError::Compute(error)), held);
            }
            Some(CacheValue::Error(_)) => {}
            Some(value) => return (Ok(Some(value)), held),
            None => {}
        }
    }

    let outcome = match compute().await {
        Ok(Some(value)) => {
            inner.backend.set(key, &value, ttl).await;
            Ok(Some(value))
        }
        // An absent result is returned but never stored.
        Ok(None) => Ok(None),
        Err(error) => {
            if let Some(predicate) = &options.should_cache_error
                && predicate(&error)
            {
                inner
                    .backend
                    .set(key, &CacheValue::Error(error.clone()), ttl)
                    .await;
            }
            Err(CacheError::Compute(error))
        }
    };

    (outcome, held)
}
