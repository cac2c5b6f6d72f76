#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod backend;
mod error;
mod lock;

pub use backend::{CONNECTION_TIMEOUT_ENV, RedisCache, RedisCacheBuilder};
pub use error::Error;
pub use lock::{
    DRIFT_FACTOR_ENV, JITTER_ENV, RETRY_COUNT_ENV, RETRY_DELAY_ENV, RedlockConfig,
};
