//! Error types for the Redis tier.

use cachette_backend::BackendError;
use redis::RedisError;

/// Error type for Redis tier operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error from the underlying Redis client: connection failures,
    /// protocol errors, command failures.
    #[error("redis backend error: {0}")]
    Redis(#[from] RedisError),

    /// The configured URL is not a Redis URL.
    ///
    /// Only `redis://` and `rediss://` schemes are accepted.
    #[error("cache url must start with redis:// or rediss://, got `{0}`")]
    InvalidUrl(String),
}

impl From<Error> for BackendError {
    fn from(error: Error) -> Self {
        BackendError::Transport(Box::new(error))
    }
}
