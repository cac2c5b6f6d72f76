#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod events;
pub mod key;
pub mod ttl;
pub mod value;

pub use events::{CacheEvent, EventBus};
pub use key::{KeyError, build_key, build_key_with_limit, max_key_length_from_env};
pub use ttl::EntryTtl;
pub use value::{CacheValue, CacheableError};
