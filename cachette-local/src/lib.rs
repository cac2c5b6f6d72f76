#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod backend;
mod lock;

pub use backend::{
    DEFAULT_MAX_AGE, DEFAULT_MAX_ITEMS, LocalCache, LocalCacheBuilder, MAX_AGE_ENV, MAX_ITEMS_ENV,
};
