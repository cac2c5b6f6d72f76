//! Write-through composition of a local tier and a remote writer/reader pair.
//!
//! Read strategy:
//! 1. Check the local tier - hit: return the value.
//! 2. Concurrently fetch the remote value *and* its remaining TTL - hit:
//!    promote into the local tier with the remote's remaining TTL (the
//!    aligned-TTL policy), return the value.
//! 3. Double miss: return absence.
//!
//! Write strategy: write-through to both tiers with the same TTL; the write
//! reports success only when both tiers accepted it.
//!
//! # Known limitation
//!
//! Local entries are not invalidated by remote mutations originating in other
//! processes, so a process that promoted `k=v1` can observe staleness after
//! another process deletes or rewrites `k`. This is the stated cost of the
//! local tier; cross-process invalidation over pub/sub is a possible
//! extension.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use cachette_core::{CacheEvent, CacheValue, EntryTtl, EventBus};

use crate::backend::CacheBackend;
use crate::{BackendResult, DeleteStatus};

/// Environment variable enabling the hit/miss reporting timer, in minutes.
pub const METRICS_PERIOD_ENV: &str = "CACHETTE_METRICS_PERIOD_MINUTES";

/// Per-period hit/miss counters.
///
/// Each read increments exactly one of the three counters; the reporting
/// task snapshots and resets them on every tick.
#[derive(Debug, Default)]
struct HitMissMetrics {
    enabled: bool,
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    double_misses: AtomicU64,
}

impl HitMissMetrics {
    fn record_local_hit(&self) {
        if self.enabled {
            self.local_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_remote_hit(&self) {
        if self.enabled {
            self.remote_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_double_miss(&self) {
        if self.enabled {
            self.double_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot_and_reset(&self) -> (u64, u64, u64) {
        (
            self.local_hits.swap(0, Ordering::Relaxed),
            self.remote_hits.swap(0, Ordering::Relaxed),
            self.double_misses.swap(0, Ordering::Relaxed),
        )
    }
}

/// A local tier kept write-through-synchronized with a remote store.
///
/// The remote side is addressed through two handles: a `writer` (all
/// mutations, replication waits) and a `reader` (all reads, including TTL
/// inspection). Both usually point at the same logical store; passing the
/// same handle twice is fine.
///
/// Locking is **not** supported on the composed tier - callers that need the
/// advisory-lock surface must use the bare remote tier.
pub struct TieredCache<L, R> {
    local: L,
    writer: Arc<R>,
    reader: Arc<R>,
    events: EventBus,
    metrics: Arc<HitMissMetrics>,
}

impl<L, R> TieredCache<L, R>
where
    L: CacheBackend,
    R: CacheBackend + 'static,
{
    /// Creates a builder over the given tiers.
    pub fn builder(local: L, writer: Arc<R>, reader: Arc<R>) -> TieredCacheBuilder<L, R> {
        TieredCacheBuilder {
            local,
            writer,
            reader,
            events: None,
            metrics_period: None,
        }
    }
}

/// Builder for [`TieredCache`].
pub struct TieredCacheBuilder<L, R> {
    local: L,
    writer: Arc<R>,
    reader: Arc<R>,
    events: Option<EventBus>,
    metrics_period: Option<Duration>,
}

impl<L, R> TieredCacheBuilder<L, R>
where
    L: CacheBackend,
    R: CacheBackend + 'static,
{
    /// Reports on the given bus instead of a fresh one.
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Enables hit/miss reporting at an explicit period, bypassing the
    /// environment toggle.
    pub fn metrics_period(mut self, period: Duration) -> Self {
        self.metrics_period = Some(period);
        self
    }

    /// Builds the tiered cache, starting the reporting timer if a period was
    /// configured here or through [`METRICS_PERIOD_ENV`].
    pub fn build(self) -> TieredCache<L, R> {
        let events = self.events.unwrap_or_default();
        let period = self.metrics_period.or_else(|| metrics_period_from_env(&events));

        let metrics = Arc::new(HitMissMetrics {
            enabled: period.is_some(),
            ..HitMissMetrics::default()
        });
        if let Some(period) = period {
            spawn_reporter(Arc::downgrade(&metrics), events.clone(), period);
        }

        TieredCache {
            local: self.local,
            writer: self.writer,
            reader: self.reader,
            events,
            metrics,
        }
    }
}

/// Reads the reporting period from the environment.
///
/// An invalid value (non-integer or zero) emits a warning and leaves metrics
/// disabled; an absent value disables them silently.
fn metrics_period_from_env(events: &EventBus) -> Option<Duration> {
    let raw = std::env::var(METRICS_PERIOD_ENV).ok()?;
    match raw.parse::<u64>() {
        Ok(minutes) if minutes > 0 => Some(Duration::from_secs(minutes * 60)),
        _ => {
            events.warn(
                format!("invalid {METRICS_PERIOD_ENV} value `{raw}`, metrics disabled"),
                None,
            );
            None
        }
    }
}

fn spawn_reporter(
    metrics: std::sync::Weak<HitMissMetrics>,
    events: EventBus,
    period: Duration,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately; skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(metrics) = metrics.upgrade() else {
                break;
            };
            let (local, remote, misses) = metrics.snapshot_and_reset();
            let total = local + remote + misses;
            let hit_pct = if total == 0 {
                0
            } else {
                (local + remote) * 100 / total
            };
            events.info(format!(
                "cache reads over the last {period:?}: {local} local hits, {remote} remote hits, \
                 {misses} misses ({hit_pct}% hit ratio)",
            ));
        }
    });
}

#[async_trait]
impl<L, R> CacheBackend for TieredCache<L, R>
where
    L: CacheBackend,
    R: CacheBackend + 'static,
{
    async fn get(&self, key: &str) -> Option<CacheValue> {
        if let Some(value) = self.local.get(key).await {
            self.metrics.record_local_hit();
            self.events.emit(CacheEvent::Get {
                key: key.to_owned(),
                value: value.clone(),
            });
            return Some(value);
        }

        let (value, ttl) = tokio::join!(self.reader.get(key), self.reader.get_ttl(key));
        match value {
            Some(value) => {
                self.metrics.record_remote_hit();
                match ttl {
                    EntryTtl::Remaining(remaining) => {
                        self.local.set(key, &value, Some(remaining)).await;
                    }
                    EntryTtl::NonExpiring => {
                        self.local.set(key, &value, None).await;
                    }
                    // The entry lapsed between the two remote reads. Serve
                    // the value we got but do not promote it.
                    EntryTtl::Missing => {}
                }
                self.events.emit(CacheEvent::Get {
                    key: key.to_owned(),
                    value: value.clone(),
                });
                Some(value)
            }
            None => {
                self.metrics.record_double_miss();
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> bool {
        let (local_ok, remote_ok) = tokio::join!(
            self.local.set(key, value, ttl),
            self.writer.set(key, value, ttl),
        );
        if local_ok && remote_ok {
            self.events.emit(CacheEvent::Set {
                key: key.to_owned(),
                value: value.clone(),
            });
        }
        local_ok && remote_ok
    }

    async fn get_ttl(&self, key: &str) -> EntryTtl {
        self.reader.get_ttl(key).await
    }

    async fn delete(&self, key: &str) -> DeleteStatus {
        self.events.emit(CacheEvent::Del {
            key: key.to_owned(),
        });
        let (local, remote) = tokio::join!(self.local.delete(key), self.writer.delete(key));
        let deleted = [local, remote]
            .iter()
            .map(|status| match status {
                DeleteStatus::Deleted(n) => *n,
                DeleteStatus::Missing => 0,
            })
            .sum::<u32>();
        if deleted > 0 {
            DeleteStatus::Deleted(deleted)
        } else {
            DeleteStatus::Missing
        }
    }

    async fn clear(&self) {
        tokio::join!(self.local.clear(), self.writer.clear());
    }

    async fn clear_memory(&self) {
        tokio::join!(self.local.clear_memory(), self.writer.clear_memory());
    }

    /// Sum of both tiers' counts. A key present in both tiers is counted
    /// twice; this is a capacity gauge, not a logical key count.
    async fn item_count(&self) -> u64 {
        let (local, remote) = tokio::join!(self.local.item_count(), self.reader.item_count());
        local + remote
    }

    async fn wait_for_replication(&self, replicas: u32, timeout: Duration) -> BackendResult<u32> {
        self.writer.wait_for_replication(replicas, timeout).await
    }

    fn events(&self) -> &EventBus {
        &self.events
    }
}
