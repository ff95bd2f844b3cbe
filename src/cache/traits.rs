//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;

/// Trait for entities that can be cached.
///
/// Implementors provide a natural key (ISBN, user id) and the name of the
/// table their records live in.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  type Key: Display + Clone + PartialEq + Send + Sync;

  /// Unique identifier for this entity
  fn cache_key(&self) -> Self::Key;

  /// Entity type name, also the local store table (e.g. "books", "users")
  fn entity_type() -> &'static str;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// Server-reported total from the fetch that produced `data`
  pub total: Option<u64>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T, total: Option<u64>) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      total,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      total: None,
    }
  }

  /// Network unavailable, serving whatever was cached.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      total: None,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Network fetch failed, serving stale cache
  Offline,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Network => write!(f, "network"),
      Self::CacheFresh => write!(f, "cache"),
      Self::Offline => write!(f, "offline cache"),
    }
  }
}
