//! Environment-driven configuration and the tier factory.
//!
//! Tier selection is an explicit factory, not a module global: [`connect`]
//! returns the Redis tier when `CACHE_URL` carries a `redis://` or
//! `rediss://` URL and the local tier otherwise, and callers thread the
//! result through their own wiring.

use std::sync::Arc;
use std::time::Duration;

use cachette_backend::CacheBackend;
use cachette_core::{key::DEFAULT_MAX_KEY_LENGTH, max_key_length_from_env};
use cachette_local::{
    DEFAULT_MAX_AGE, DEFAULT_MAX_ITEMS, LocalCache, MAX_AGE_ENV, MAX_ITEMS_ENV,
};
use cachette_redis::RedisCache;

/// Environment variable carrying the Redis URL.
pub const CACHE_URL_ENV: &str = "CACHE_URL";

/// Resolved cache configuration.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Redis URL, adopted only with a `redis://` / `rediss://` scheme.
    pub cache_url: Option<String>,
    /// Local tier capacity bound, in entries.
    pub local_max_items: u64,
    /// Local tier default max age.
    pub local_max_age: Duration,
    /// Façade key-length cap, in bytes.
    pub max_key_length: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            cache_url: None,
            local_max_items: DEFAULT_MAX_ITEMS,
            local_max_age: DEFAULT_MAX_AGE,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
        }
    }
}

impl CacheSettings {
    /// Reads the configuration from the environment (`CACHE_URL`,
    /// `CACHETTE_LC_MAX_ITEMS`, `CACHETTE_LC_MAX_AGE`,
    /// `UNITO_CACHE_MAX_KEY_LENGTH`). Unparsable values warn and keep their
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        CacheSettings {
            cache_url: std::env::var(CACHE_URL_ENV).ok().filter(|url| !url.is_empty()),
            local_max_items: env_number(MAX_ITEMS_ENV).unwrap_or(defaults.local_max_items),
            local_max_age: env_number(MAX_AGE_ENV)
                .map(Duration::from_millis)
                .unwrap_or(defaults.local_max_age),
            max_key_length: max_key_length_from_env(),
        }
    }
}

fn env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "unparsable environment override ignored");
            None
        }
    }
}

/// Builds the tier selected by the settings: Redis for an adopted
/// `CACHE_URL`, the local tier otherwise.
///
/// A URL with the wrong scheme or a failing Redis constructor logs a warning
/// and falls back to the local tier - startup never fails on cache
/// configuration.
pub fn connect(settings: &CacheSettings) -> Arc<dyn CacheBackend> {
    if let Some(url) = &settings.cache_url {
        if url.starts_with("redis://") || url.starts_with("rediss://") {
            match RedisCache::builder(url.clone()).build() {
                Ok(redis) => return Arc::new(redis),
                Err(error) => {
                    tracing::warn!(%error, "could not build the redis tier, using the local tier");
                }
            }
        } else {
            tracing::warn!(
                url = %url,
                "{CACHE_URL_ENV} is not a redis:// or rediss:// url, using the local tier"
            );
        }
    }
    Arc::new(local_tier(settings))
}

/// Reads the environment and builds the selected tier.
pub fn connect_from_env() -> Arc<dyn CacheBackend> {
    connect(&CacheSettings::from_env())
}

fn local_tier(settings: &CacheSettings) -> LocalCache {
    LocalCache::builder()
        .max_items(settings.local_max_items)
        .max_age(settings.local_max_age)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    use cachette_core::CacheValue;

    #[tokio::test]
    async fn default_settings_select_the_local_tier() {
        let cache = connect(&CacheSettings::default());
        // The local tier serves reads entirely in process.
        assert!(cache.set("k", &CacheValue::from("v"), None).await);
        assert_eq!(cache.get("k").await, Some(CacheValue::from("v")));
    }

    #[tokio::test]
    async fn non_redis_urls_are_not_adopted() {
        let settings = CacheSettings {
            cache_url: Some("memcached://elsewhere".to_owned()),
            ..CacheSettings::default()
        };
        let cache = connect(&settings);
        assert!(cache.set("k", &CacheValue::from("v"), None).await);
        assert_eq!(cache.get("k").await, Some(CacheValue::from("v")));
    }

    #[test]
    fn redis_urls_are_adopted() {
        let settings = CacheSettings {
            cache_url: Some("redis://localhost:6379/0".to_owned()),
            ..CacheSettings::default()
        };
        // The Redis tier connects lazily, so building it needs no server.
        let cache = connect(&settings);
        assert!(cache.is_locking_supported());
    }
}
