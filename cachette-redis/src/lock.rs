//! Redlock-style distributed locks over the writer connection.
//!
//! Acquisition is `SET name token NX PX ttl`; a successful reply only counts
//! when the remaining validity (TTL minus elapsed time minus clock drift
//! allowance) is positive, per the Redlock algorithm. Release is a
//! compare-and-delete script so a holder can never free a lock that has
//! since been reclaimed by someone else.

use std::sync::LazyLock;
use std::time::Duration;

use rand::Rng;
use redis::aio::ConnectionManager;
use tokio::time::Instant;
use uuid::Uuid;

use cachette_backend::{LockError, LockHandle};

use crate::error::Error;

/// Environment variable for the acquisition retry count.
pub const RETRY_COUNT_ENV: &str = "REDLOCK_RETRY_COUNT";
/// Environment variable for the delay between retries, in milliseconds.
pub const RETRY_DELAY_ENV: &str = "REDLOCK_RETRY_DELAY_MS";
/// Environment variable for the random jitter added to each retry delay.
pub const JITTER_ENV: &str = "REDLOCK_JITTER_MS";
/// Environment variable for the clock drift factor.
pub const DRIFT_FACTOR_ENV: &str = "REDLOCK_CLOCK_DRIFT_FACTOR";

static UNLOCK_SCRIPT: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r#"if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end"#,
    )
});

/// Tuning for one Redlock controller.
///
/// The Redis tier keeps two controllers over the same store: one with this
/// retry budget and one with [`without_retry`](Self::without_retry) applied.
#[derive(Debug, Clone)]
pub struct RedlockConfig {
    /// Number of re-acquisition attempts after the first.
    pub retry_count: u32,
    /// Base delay between attempts.
    pub retry_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub jitter: Duration,
    /// Fraction of the TTL reserved for clock drift between processes.
    pub drift_factor: f64,
}

impl Default for RedlockConfig {
    fn default() -> Self {
        RedlockConfig {
            retry_count: 10,
            retry_delay: Duration::from_millis(200),
            jitter: Duration::from_millis(100),
            drift_factor: 0.01,
        }
    }
}

impl RedlockConfig {
    /// Reads the configuration from the `REDLOCK_*` environment variables,
    /// falling back to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        RedlockConfig {
            retry_count: env_parse(RETRY_COUNT_ENV).unwrap_or(defaults.retry_count),
            retry_delay: env_parse(RETRY_DELAY_ENV)
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            jitter: env_parse(JITTER_ENV)
                .map(Duration::from_millis)
                .unwrap_or(defaults.jitter),
            drift_factor: env_parse(DRIFT_FACTOR_ENV).unwrap_or(defaults.drift_factor),
        }
    }

    /// The zero-retry variant of this configuration.
    pub fn without_retry(&self) -> Self {
        RedlockConfig {
            retry_count: 0,
            ..self.clone()
        }
    }

    /// Drift allowance for a given TTL: `ttl * drift_factor + 2 ms`.
    fn drift(&self, ttl: Duration) -> Duration {
        Duration::from_secs_f64(ttl.as_secs_f64() * self.drift_factor)
            + Duration::from_millis(2)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "unparsable environment override ignored");
            None
        }
    }
}

/// Acquires `name` for `ttl`, retrying per `config`.
pub(crate) async fn acquire(
    conn: &mut ConnectionManager,
    name: &str,
    ttl: Duration,
    config: &RedlockConfig,
) -> Result<LockHandle, LockError> {
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();

        let reply: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(conn)
            .await
            .map_err(|e| LockError::Backend(Error::from(e).into()))?;

        if reply.is_some() {
            // The lock only counts if enough validity remains once the
            // acquisition round trip and clock drift are accounted for.
            let spent = started.elapsed() + config.drift(ttl);
            match ttl.checked_sub(spent) {
                Some(validity) if validity > Duration::ZERO => {
                    let expires_at = chrono::Utc::now()
                        + chrono::Duration::from_std(validity)
                            .unwrap_or_else(|_| chrono::Duration::zero());
                    return Ok(LockHandle::new(name, token, expires_at));
                }
                _ => {
                    // Acquired too late to be useful. Free it for the next
                    // caller and treat this attempt as a failure.
                    let stale = LockHandle::new(name, token, chrono::Utc::now());
                    let _ = compare_and_delete(conn, &stale).await;
                }
            }
        }

        if attempts > config.retry_count {
            return Err(LockError::Unavailable {
                name: name.to_owned(),
                attempts,
            });
        }

        let jitter_ms = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..=config.jitter.as_millis() as u64)
        };
        tokio::time::sleep(config.retry_delay + Duration::from_millis(jitter_ms)).await;
    }
}

/// Releases a handle. Expired handles are a no-op: the name may already
/// belong to another holder, and the script would refuse anyway.
pub(crate) async fn release(
    conn: &mut ConnectionManager,
    handle: &LockHandle,
) -> Result<(), LockError> {
    if handle.is_expired() {
        return Ok(());
    }
    compare_and_delete(conn, handle).await
}

async fn compare_and_delete(
    conn: &mut ConnectionManager,
    handle: &LockHandle,
) -> Result<(), LockError> {
    let _deleted: i32 = UNLOCK_SCRIPT
        .key(handle.name())
        .arg(handle.token())
        .invoke_async(conn)
        .await
        .map_err(|e| LockError::Backend(Error::from(e).into()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_scales_with_ttl() {
        let config = RedlockConfig::default();
        let short = config.drift(Duration::from_millis(100));
        let long = config.drift(Duration::from_secs(100));
        assert!(short < long);
        // 1% of 100 s plus the fixed 2 ms allowance.
        assert_eq!(long, Duration::from_secs(1) + Duration::from_millis(2));
    }

    #[test]
    fn without_retry_zeroes_only_the_count() {
        let config = RedlockConfig {
            retry_count: 7,
            retry_delay: Duration::from_millis(50),
            jitter: Duration::from_millis(5),
            drift_factor: 0.02,
        };
        let no_retry = config.without_retry();
        assert_eq!(no_retry.retry_count, 0);
        assert_eq!(no_retry.retry_delay, config.retry_delay);
        assert_eq!(no_retry.drift_factor, config.drift_factor);
    }
}
