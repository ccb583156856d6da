//! Block cache for seekers.
//!
//! Provides an LRU (Least Recently Used) cache so repeated seeks into the
//! same block skip the read and the inflate.

mod lru;

pub use lru::{BlockCache, CacheStats};
