//! The Redis-backed remote tier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::Client;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::{OnceCell, RwLock};

use cachette_backend::{
    BackendError, BackendResult, CacheBackend, DeleteStatus, LOCK_NAME_PREFIX, LockError,
    LockHandle, codec,
};
use cachette_core::{CacheEvent, CacheValue, EntryTtl, EventBus};

use crate::error::Error;
use crate::lock::{self, RedlockConfig};

/// Environment variable for the connection timeout, in milliseconds.
pub const CONNECTION_TIMEOUT_ENV: &str = "REDIS_CONNECTION_TIMEOUT_MS";

/// Default reconnection delay after a lost connection.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Encoded-body size above which a write emits a `largeWrite` warning.
const DEFAULT_LARGE_VALUE_THRESHOLD: usize = 100_000;

/// Redis-backed cache tier.
///
/// Use [`RedisCache::builder`] to construct one. Connections are established
/// lazily on first use; [`is_ready`](RedisCache::is_ready) forces the
/// attempt and reports health.
///
/// # Example
///
/// ```no_run
/// use cachette_redis::RedisCache;
///
/// # fn main() -> Result<(), cachette_redis::Error> {
/// let cache = RedisCache::builder("redis://localhost:6379/0")
///     .reconnect_delay(std::time::Duration::from_secs(5))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedisCache {
    url: String,
    reader_url: Option<String>,
    connection_timeout: Option<Duration>,
    reconnect_delay: Duration,
    exponent_base: f32,
    large_value_threshold: usize,
    redlock: RedlockConfig,
    redlock_no_retry: RedlockConfig,

    /// Writer connection. Held behind a lock so a `READONLY` reply (the
    /// failover signal) can drop it and force a fresh resolve of the primary.
    writer: RwLock<Option<ConnectionManager>>,
    /// Read-replica view. Never reset: a replica answering reads is healthy.
    reader: OnceCell<ConnectionManager>,
    ready_announced: AtomicBool,
    events: EventBus,
}

impl RedisCache {
    /// Creates a builder for the given writer URL.
    pub fn builder(url: impl Into<String>) -> RedisCacheBuilder {
        RedisCacheBuilder {
            url: url.into(),
            reader_url: None,
            connection_timeout: env_timeout(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            exponent_base: 1.0,
            large_value_threshold: DEFAULT_LARGE_VALUE_THRESHOLD,
            redlock: RedlockConfig::from_env(),
            events: None,
        }
    }

    async fn connect(&self, url: &str) -> Result<ConnectionManager, Error> {
        let client = Client::open(url)?;

        let mut config = ConnectionManagerConfig::new()
            .set_factor(self.reconnect_delay.as_millis() as u64)
            .set_exponent_base(self.exponent_base as u64);
        if let Some(timeout) = self.connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let conn = client.get_connection_manager_with_config(config).await?;
        if !self.ready_announced.swap(true, Ordering::SeqCst) {
            self.events.info(format!("redis connection established ({url})"));
        }
        Ok(conn)
    }

    /// The writer connection, established on first use.
    async fn write_connection(&self) -> Result<ConnectionManager, Error> {
        if let Some(conn) = self.writer.read().await.clone() {
            return Ok(conn);
        }
        let mut slot = self.writer.write().await;
        if let Some(conn) = slot.clone() {
            return Ok(conn);
        }
        let conn = self.connect(&self.url).await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// The reader connection: the replica view when configured, the writer
    /// otherwise.
    async fn read_connection(&self) -> Result<ConnectionManager, Error> {
        match &self.reader_url {
            None => self.write_connection().await,
            Some(url) => self
                .reader
                .get_or_try_init(|| self.connect(url))
                .await
                .cloned(),
        }
    }

    /// Drops the writer connection so the next operation re-resolves the
    /// primary. Called when a write gets a `READONLY` reply, which means the
    /// node we were talking to was demoted by a failover.
    async fn reset_writer(&self, error: &redis::RedisError) {
        self.events.warn(
            "redis write hit a read-only replica, reconnecting to the primary".to_owned(),
            Some(error.to_string()),
        );
        *self.writer.write().await = None;
    }

    async fn handle_write_error(&self, error: &redis::RedisError) {
        if is_readonly(error) {
            self.reset_writer(error).await;
        }
    }

    fn warn_degraded(&self, operation: &str, key: &str, error: &Error) {
        self.events.warn(
            format!("redis {operation} failed for key `{key}`, degrading"),
            Some(error.to_string()),
        );
    }

    /// Forces connection establishment and reports health. Resolves `true`
    /// once the tier has answered a `PING`.
    pub async fn is_ready(&self) -> bool {
        let Ok(mut conn) = self.write_connection().await else {
            return false;
        };
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }

    async fn try_get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.read_connection().await?;
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn try_set(&self, key: &str, body: &str, ttl: Option<Duration>) -> Result<(), Error> {
        let mut conn = self.write_connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(body);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        let written: Result<(), redis::RedisError> = cmd.query_async(&mut conn).await;
        match written {
            Ok(()) => Ok(()),
            Err(error) => {
                self.handle_write_error(&error).await;
                Err(error.into())
            }
        }
    }

    async fn try_get_ttl(&self, key: &str) -> Result<EntryTtl, Error> {
        let mut conn = self.read_connection().await?;
        let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(EntryTtl::from_pttl(pttl))
    }

    async fn try_delete(&self, key: &str) -> Result<u32, Error> {
        let mut conn = self.write_connection().await?;
        let deleted: Result<i64, redis::RedisError> =
            redis::cmd("DEL").arg(key).query_async(&mut conn).await;
        match deleted {
            Ok(deleted) => Ok(deleted.max(0) as u32),
            Err(error) => {
                self.handle_write_error(&error).await;
                Err(error.into())
            }
        }
    }
}

fn is_readonly(error: &redis::RedisError) -> bool {
    error.kind() == redis::ErrorKind::ReadOnly || error.code() == Some("READONLY")
}

fn env_timeout() -> Option<Duration> {
    let raw = std::env::var(CONNECTION_TIMEOUT_ENV).ok()?;
    match raw.parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(
                value = %raw,
                "unparsable {CONNECTION_TIMEOUT_ENV} ignored"
            );
            None
        }
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Option<CacheValue> {
        let raw = match self.try_get(key).await {
            Ok(raw) => raw,
            Err(error) => {
                self.warn_degraded("get", key, &error);
                return None;
            }
        };
        let value = codec::decode(raw.as_deref())?;
        self.events.emit(CacheEvent::Get {
            key: key.to_owned(),
            value: value.clone(),
        });
        Some(value)
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> bool {
        let body = match codec::encode(value) {
            Ok(body) => body,
            Err(error) => {
                self.events.warn(
                    format!("could not encode value for key `{key}`"),
                    Some(error.to_string()),
                );
                return false;
            }
        };
        if body.len() > self.large_value_threshold {
            self.events.warn(
                format!(
                    "largeWrite: key `{key}` carries a {} byte body (threshold {})",
                    body.len(),
                    self.large_value_threshold
                ),
                None,
            );
        }

        match self.try_set(key, &body, ttl).await {
            Ok(()) => {
                self.events.emit(CacheEvent::Set {
                    key: key.to_owned(),
                    value: value.clone(),
                });
                true
            }
            Err(error) => {
                self.warn_degraded("set", key, &error);
                false
            }
        }
    }

    async fn get_ttl(&self, key: &str) -> EntryTtl {
        match self.try_get_ttl(key).await {
            Ok(ttl) => ttl,
            Err(error) => {
                self.warn_degraded("get_ttl", key, &error);
                EntryTtl::Missing
            }
        }
    }

    async fn delete(&self, key: &str) -> DeleteStatus {
        let status = match self.try_delete(key).await {
            Ok(0) => DeleteStatus::Missing,
            Ok(deleted) => DeleteStatus::Deleted(deleted),
            Err(error) => {
                self.warn_degraded("delete", key, &error);
                DeleteStatus::Missing
            }
        };
        self.events.emit(CacheEvent::Del {
            key: key.to_owned(),
        });
        status
    }

    /// Flushes the whole database.
    async fn clear(&self) {
        let result: Result<(), Error> = async {
            let mut conn = self.write_connection().await?;
            let flushed: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
            Ok(flushed)
        }
        .await;
        if let Err(error) = result {
            self.events
                .warn("redis clear failed".to_owned(), Some(error.to_string()));
        }
    }

    /// No in-process state to clear on a remote tier.
    async fn clear_memory(&self) {}

    async fn item_count(&self) -> u64 {
        let result: Result<i64, Error> = async {
            let mut conn = self.read_connection().await?;
            Ok(redis::cmd("DBSIZE").query_async(&mut conn).await?)
        }
        .await;
        match result {
            Ok(count) => count.max(0) as u64,
            Err(error) => {
                self.events
                    .warn("redis item_count failed".to_owned(), Some(error.to_string()));
                0
            }
        }
    }

    async fn wait_for_replication(&self, replicas: u32, timeout: Duration) -> BackendResult<u32> {
        let mut conn = self.write_connection().await.map_err(BackendError::from)?;
        let acknowledged: i64 = redis::cmd("WAIT")
            .arg(replicas)
            .arg(timeout.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| BackendError::from(Error::from(e)))?;
        let acknowledged = acknowledged.max(0) as u32;
        self.events.emit(CacheEvent::Wait {
            replicas,
            acknowledged,
        });
        Ok(acknowledged)
    }

    fn is_locking_supported(&self) -> bool {
        true
    }

    async fn lock(&self, name: &str, ttl: Duration, retry: bool) -> Result<LockHandle, LockError> {
        let mut conn = self
            .write_connection()
            .await
            .map_err(|e| LockError::Backend(e.into()))?;
        let config = if retry {
            &self.redlock
        } else {
            &self.redlock_no_retry
        };
        lock::acquire(&mut conn, name, ttl, config).await
    }

    async fn unlock(&self, handle: LockHandle) -> Result<(), LockError> {
        let mut conn = self
            .write_connection()
            .await
            .map_err(|e| LockError::Backend(e.into()))?;
        lock::release(&mut conn, &handle).await
    }

    /// Reports whether any live lock named `lock__{prefix}...` exists.
    ///
    /// This is a cursor-paginated `SCAN MATCH lock__{prefix}* COUNT 1000`
    /// that short-circuits on the first match. Scan cost is linear in
    /// database size; callers relying on this index should scope their
    /// database accordingly.
    async fn has_lock(&self, prefix: &str) -> Result<bool, LockError> {
        let mut conn = self
            .read_connection()
            .await
            .map_err(|e| LockError::Backend(e.into()))?;
        let pattern = format!("{LOCK_NAME_PREFIX}{prefix}*");
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await
                .map_err(|e| LockError::Backend(Error::from(e).into()))?;
            if !keys.is_empty() {
                return Ok(true);
            }
            if next == 0 {
                return Ok(false);
            }
            cursor = next;
        }
    }

    fn events(&self) -> &EventBus {
        &self.events
    }
}

/// Builder for [`RedisCache`].
pub struct RedisCacheBuilder {
    url: String,
    reader_url: Option<String>,
    connection_timeout: Option<Duration>,
    reconnect_delay: Duration,
    exponent_base: f32,
    large_value_threshold: usize,
    redlock: RedlockConfig,
    events: Option<EventBus>,
}

impl RedisCacheBuilder {
    /// Points reads (`get`, `get_ttl`, `item_count`, `has_lock`) at a
    /// read-replica URL. Writes and lock mutations stay on the writer.
    pub fn reader_url(mut self, url: impl Into<String>) -> Self {
        self.reader_url = Some(url.into());
        self
    }

    /// Timeout for establishing connections.
    ///
    /// # Default
    ///
    /// `REDIS_CONNECTION_TIMEOUT_MS` when set, otherwise none.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Delay between reconnection attempts after a lost connection.
    ///
    /// # Default
    ///
    /// 5 s, applied indefinitely (the base of the backoff is 1, so the
    /// delay stays fixed).
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Exponential backoff base for reconnection delays. `1.0` keeps the
    /// delay fixed.
    pub fn exponent_base(mut self, base: f32) -> Self {
        self.exponent_base = base;
        self
    }

    /// Encoded-body size above which writes emit a `largeWrite` warning.
    /// The write still happens.
    pub fn large_value_threshold(mut self, threshold: usize) -> Self {
        self.large_value_threshold = threshold;
        self
    }

    /// Tuning for the retrying distributed-lock controller.
    ///
    /// # Default
    ///
    /// [`RedlockConfig::from_env`].
    pub fn redlock(mut self, config: RedlockConfig) -> Self {
        self.redlock = config;
        self
    }

    /// Reports on the given bus instead of a fresh one.
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Builds the tier.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUrl`] unless both URLs use the `redis://` or
    /// `rediss://` scheme. Connection errors surface on first use, not here.
    pub fn build(self) -> Result<RedisCache, Error> {
        validate_url(&self.url)?;
        if let Some(reader_url) = &self.reader_url {
            validate_url(reader_url)?;
        }

        let redlock_no_retry = self.redlock.without_retry();
        Ok(RedisCache {
            url: self.url,
            reader_url: self.reader_url,
            connection_timeout: self.connection_timeout,
            reconnect_delay: self.reconnect_delay,
            exponent_base: self.exponent_base,
            large_value_threshold: self.large_value_threshold,
            redlock: self.redlock,
            redlock_no_retry,
            writer: RwLock::new(None),
            reader: OnceCell::new(),
            ready_announced: AtomicBool::new(false),
            events: self.events.unwrap_or_default(),
        })
    }
}

/// Accepts `redis://` and `rediss://` URLs only.
pub(crate) fn validate_url(url: &str) -> Result<(), Error> {
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        Ok(())
    } else {
        Err(Error::InvalidUrl(url.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_redis_urls_are_rejected() {
        assert!(RedisCache::builder("memcached://somewhere").build().is_err());
        assert!(RedisCache::builder("http://example.com").build().is_err());
        assert!(RedisCache::builder("redis://localhost:6379").build().is_ok());
        assert!(RedisCache::builder("rediss://localhost:6380").build().is_ok());
    }

    #[test]
    fn reader_url_is_validated_too() {
        let result = RedisCache::builder("redis://localhost:6379")
            .reader_url("file:///tmp/nope")
            .build();
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
