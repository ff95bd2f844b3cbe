//! Generic caching layer for data persistence and offline support.
//!
//! This module provides an API-agnostic caching mechanism that:
//! - Persists entities in a per-type key-value table
//! - Serves lists from memory while they are younger than a TTL
//! - Writes every fetched entity through to the local store
//! - Remembers when each list was fetched and which records it held, so
//!   freshness survives a restart
//! - Serves stale data when the network is unavailable

mod clock;
mod layer;
mod meta;
mod storage;
mod traits;

#[cfg(test)]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use layer::{Page, TimedCache};
pub use storage::{SqliteStorage, StoreLocation};
pub use traits::{CacheResult, CacheSource, Cacheable};
