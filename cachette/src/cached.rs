//! The computation-caching façade.
//!
//! [`CachedComputation`] binds a computation to a deterministic cache key
//! built from its name and arguments, and routes invocations through the
//! single-flight coordinator. Arguments are plain JSON data
//! ([`serde_json::Value`]), which is what makes the key construction
//! deterministic: records and sequences are sorted during rendering, and
//! anything fancier than plain data cannot be passed at all.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use cachette_backend::{BackendResult, CacheBackend, DeleteStatus};
use cachette_core::{CacheValue, CacheableError, build_key_with_limit, max_key_length_from_env};

use crate::cache::{Cachette, ErrorPredicate, FetchOptions};
use crate::error::CacheError;

/// The bound computation: arguments in, future value out.
pub type ComputeFn = Arc<
    dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Option<CacheValue>, CacheableError>>
        + Send
        + Sync,
>;

/// Builder for [`CachedComputation`]. Created by [`Cachette::cached`].
pub struct CachedBuilder<B> {
    cache: Cachette<B>,
    name: String,
    ttl_seconds: u64,
    compute: ComputeFn,
    lock_ttl: Option<Duration>,
    should_cache_error: ErrorPredicate,
    max_key_length: Option<usize>,
}

impl<B> CachedBuilder<B>
where
    B: CacheBackend + 'static,
{
    pub(crate) fn new(
        cache: Cachette<B>,
        name: String,
        ttl_seconds: u64,
        compute: ComputeFn,
    ) -> Self {
        CachedBuilder {
            cache,
            name,
            ttl_seconds,
            compute,
            lock_ttl: None,
            should_cache_error: Arc::new(|_| true),
            max_key_length: None,
        }
    }

    /// Serializes fetches across processes with a distributed lock of the
    /// given TTL (on tiers that support locking).
    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }

    /// Predicate used by [`CachedComputation::call_error_caching`] to decide
    /// which computation errors become cache entries.
    ///
    /// # Default
    ///
    /// Every error is cached.
    pub fn should_cache_error(mut self, predicate: ErrorPredicate) -> Self {
        self.should_cache_error = predicate;
        self
    }

    /// Overrides the environment-configured key-length cap.
    pub fn max_key_length(mut self, max: usize) -> Self {
        self.max_key_length = Some(max);
        self
    }

    /// Builds the cached computation.
    pub fn build(self) -> CachedComputation<B> {
        CachedComputation {
            cache: self.cache,
            name: self.name,
            ttl_seconds: self.ttl_seconds,
            compute: self.compute,
            lock_ttl: self.lock_ttl,
            should_cache_error: self.should_cache_error,
            max_key_length: self.max_key_length.unwrap_or_else(max_key_length_from_env),
        }
    }
}

/// A computation bound to a cache key policy.
///
/// All invocation paths build the same key from the same arguments, so they
/// can be mixed freely on one instance:
///
/// - [`call`](Self::call) - the cached invocation (errors are not cached)
/// - [`call_error_caching`](Self::call_error_caching) - sibling path that
///   caches errors per the configured predicate and rethrows cached ones
/// - [`call_uncached`](Self::call_uncached) - bypasses the cache entirely
/// - [`peek_cached`](Self::peek_cached) / [`clear_cached`](Self::clear_cached)
///   - tier read / delete without computing
pub struct CachedComputation<B> {
    cache: Cachette<B>,
    name: String,
    ttl_seconds: u64,
    compute: ComputeFn,
    lock_ttl: Option<Duration>,
    should_cache_error: ErrorPredicate,
    max_key_length: usize,
}

impl<B> CachedComputation<B>
where
    B: CacheBackend + 'static,
{
    /// The key this computation uses for the given arguments.
    pub fn key(&self, args: &[Value]) -> Result<String, CacheError> {
        Ok(build_key_with_limit(&self.name, args, self.max_key_length)?)
    }

    fn options(&self) -> FetchOptions {
        match self.lock_ttl {
            Some(ttl) => FetchOptions::new().lock_ttl(ttl),
            None => FetchOptions::new(),
        }
    }

    fn bound_compute(
        &self,
        args: &[Value],
    ) -> Box<dyn FnOnce() -> BoxFuture<'static, Result<Option<CacheValue>, CacheableError>> + Send>
    {
        let compute = Arc::clone(&self.compute);
        let args = args.to_vec();
        Box::new(move || compute(args))
    }

    /// Cached invocation. Computation errors propagate but are not cached.
    pub async fn call(&self, args: &[Value]) -> Result<Option<CacheValue>, CacheError> {
        let key = self.key(args)?;
        self.cache
            .get_or_fetch_with(&key, self.ttl_seconds, self.bound_compute(args), self.options())
            .await
    }

    /// Cached invocation that also caches errors per the configured
    /// predicate, and rethrows a cached error on later calls.
    pub async fn call_error_caching(&self, args: &[Value]) -> Result<Option<CacheValue>, CacheError> {
        let key = self.key(args)?;
        let options = self
            .options()
            .cache_errors_if(Arc::clone(&self.should_cache_error));
        self.cache
            .get_or_fetch_with(&key, self.ttl_seconds, self.bound_compute(args), options)
            .await
    }

    /// Invokes the computation directly, bypassing the cache.
    pub async fn call_uncached(&self, args: &[Value]) -> Result<Option<CacheValue>, CacheError> {
        (self.compute)(args.to_vec())
            .await
            .map_err(CacheError::Compute)
    }

    /// Deletes the entry for the given arguments.
    pub async fn clear_cached(&self, args: &[Value]) -> Result<DeleteStatus, CacheError> {
        let key = self.key(args)?;
        Ok(self.cache.delete(&key).await)
    }

    /// Tier read without fetching. A stored error entry is returned as a
    /// value, not rethrown.
    pub async fn peek_cached(&self, args: &[Value]) -> Result<Option<CacheValue>, CacheError> {
        let key = self.key(args)?;
        Ok(self.cache.get(&key).await)
    }

    /// Delegates to the tier's replication wait.
    pub async fn wait_for_replication(&self, replicas: u32, timeout: Duration) -> BackendResult<u32> {
        self.cache.wait_for_replication(replicas, timeout).await
    }
}
