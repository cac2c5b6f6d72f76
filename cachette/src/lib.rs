#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod cache;
mod cached;
mod error;
mod settings;

pub use cache::{Cachette, ErrorPredicate, FetchOptions};
pub use cached::{CachedBuilder, CachedComputation, ComputeFn};
pub use error::CacheError;
pub use settings::{CacheSettings, connect, connect_from_env};

pub use cachette_backend::{
    BackendError, CacheBackend, DeleteStatus, LockError, LockHandle, TieredCache, lock_name,
};
pub use cachette_core::{
    CacheEvent, CacheValue, CacheableError, EntryTtl, EventBus, KeyError, build_key,
};

/// The commonly used subset of the crate.
pub mod prelude {
    pub use crate::{CacheBackend, CacheError, CacheValue, CacheableError, Cachette, FetchOptions};
}
