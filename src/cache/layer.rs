//! Cache layer that orchestrates caching logic with network fetching.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::clock::{Clock, SystemClock};
use super::meta::{self, ListMeta};
use super::storage::SqliteStorage;
use super::traits::{CacheResult, Cacheable};
use crate::error::{ClientError, Result};
use crate::event::{Notice, Notifier};

/// One page of entities as returned by the remote API.
#[derive(Debug, Clone)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub total: u64,
}

impl<T> Page<T> {
  /// A page that holds the whole collection.
  pub fn complete(items: Vec<T>) -> Self {
    let total = items.len() as u64;
    Self { items, total }
  }
}

struct CacheState<T> {
  /// Which list of the entity type is held, e.g. one page
  scope: String,
  items: Vec<T>,
  /// Epoch milliseconds of the last successful list fetch
  last_updated: Option<i64>,
  /// Server total reported with `items`
  total: Option<u64>,
  /// Whether the persisted bookkeeping for `scope` has been read
  restored: bool,
}

impl<T> CacheState<T> {
  fn new(scope: String) -> Self {
    Self {
      scope,
      items: Vec::new(),
      last_updated: None,
      total: None,
      restored: false,
    }
  }
}

/// Time-bounded cache for one entity type.
///
/// Serves lists from memory while they are younger than the TTL, refetches
/// otherwise, and writes everything fetched through to the local store
/// together with the list's timestamp and keys, so freshness and offline
/// fallback carry over to the next process.
/// The state lock is held for the whole fetch, so concurrent `fetch_list`
/// calls coalesce onto one network request and never see a half-applied
/// update.
pub struct TimedCache<T: Cacheable> {
  storage: Arc<SqliteStorage>,
  ttl: Duration,
  clock: Arc<dyn Clock>,
  notifier: Notifier,
  state: Mutex<CacheState<T>>,
}

impl<T: Cacheable> TimedCache<T> {
  pub fn new(storage: Arc<SqliteStorage>, ttl: Duration, notifier: Notifier) -> Self {
    Self {
      storage,
      ttl,
      clock: Arc::new(SystemClock),
      notifier,
      state: Mutex::new(CacheState::new(String::new())),
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Start out on the list named `scope`.
  pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
    *self.state.get_mut() = CacheState::new(scope.into());
    self
  }

  /// Switch to another list of the same entity type, e.g. another page.
  pub async fn set_scope(&self, scope: impl Into<String>) {
    let scope = scope.into();
    let mut state = self.state.lock().await;
    if state.scope != scope {
      *state = CacheState::new(scope);
    }
  }

  fn is_fresh(&self, last_updated: Option<i64>) -> bool {
    let ttl = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
    last_updated.is_some_and(|at| self.clock.now_millis() - at < ttl)
  }

  /// Load the list last persisted for the current scope, once.
  ///
  /// A list whose records are no longer all in the store is kept for
  /// offline use but never counts as fresh.
  async fn restore(&self, state: &mut CacheState<T>) {
    if state.restored {
      return;
    }
    state.restored = true;
    let entity = T::entity_type();

    let saved = match meta::load(&self.storage, entity, &state.scope).await {
      Ok(Some(saved)) => saved,
      Ok(None) => return,
      Err(e) => {
        tracing::warn!(entity, error = %e, "could not read list bookkeeping");
        return;
      }
    };

    match self.storage.get_many::<T>(&saved.keys).await {
      Ok(items) => {
        let complete = items.len() == saved.keys.len();
        tracing::debug!(entity, count = items.len(), complete, "restored persisted list");
        state.last_updated = saved.last_updated.filter(|_| complete);
        state.items = items;
        state.total = saved.total;
      }
      Err(e) => tracing::warn!(entity, error = %e, "could not restore persisted list"),
    }
  }

  /// Fetch the list with a cache-first strategy.
  ///
  /// 1. Unless forced, a fresh and non-empty cached list is returned as is
  /// 2. Otherwise fetch from network, replace the list and persist it
  /// 3. On network failure, serve the last list fetched for this scope and
  ///    report the failure as a notice; only fail when there is none
  pub async fn fetch_list<F, Fut>(&self, force_refresh: bool, fetcher: F) -> Result<CacheResult<Vec<T>>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
  {
    let entity = T::entity_type();
    let mut state = self.state.lock().await;
    self.restore(&mut state).await;

    if !force_refresh && self.is_fresh(state.last_updated) && !state.items.is_empty() {
      tracing::debug!(entity, count = state.items.len(), "serving cached list");
      return Ok(CacheResult {
        total: state.total,
        ..CacheResult::from_cache(state.items.clone())
      });
    }

    tracing::debug!(entity, force_refresh, "fetching list from network");
    match fetcher().await {
      Ok(page) => {
        let now = self.clock.now_millis();
        if let Err(e) = self.storage.bulk_put(&page.items).await {
          tracing::warn!(entity, error = %e, "failed to persist fetched list");
        } else {
          let saved = ListMeta {
            last_updated: Some(now),
            total: Some(page.total),
            keys: page.items.iter().map(|item| item.cache_key().to_string()).collect(),
          };
          if let Err(e) = meta::save(&self.storage, entity, &state.scope, saved).await {
            tracing::warn!(entity, error = %e, "failed to persist list bookkeeping");
          }
        }
        state.items = page.items;
        state.last_updated = Some(now);
        state.total = Some(page.total);
        Ok(CacheResult::from_network(state.items.clone(), Some(page.total)))
      }
      Err(ClientError::AuthExpired) => Err(ClientError::AuthExpired),
      Err(e) => {
        if state.items.is_empty() {
          return Err(e);
        }

        tracing::warn!(entity, error = %e, "refresh failed, serving stale cache");
        self
          .notifier
          .send(Notice::Error(format!("Failed to refresh {entity}: {e}")));
        Ok(CacheResult {
          total: state.total,
          ..CacheResult::offline(state.items.clone())
        })
      }
    }
  }

  /// Fetch a single entity, local store first.
  ///
  /// Single-item lookups do not check freshness: anything in the local store
  /// is returned as is.
  pub async fn fetch_one<F, Fut>(&self, id: &T::Key, fetcher: F) -> Result<CacheResult<T>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let entity = T::entity_type();

    match self.storage.get::<T>(id).await {
      Ok(Some(item)) => return Ok(CacheResult::from_cache(item)),
      Ok(None) => {}
      Err(e) => tracing::warn!(entity, %id, error = %e, "cache lookup failed, treating as miss"),
    }

    let item = fetcher().await?;
    if let Err(e) = self.storage.put(&item).await {
      tracing::warn!(entity, %id, error = %e, "failed to persist fetched item");
    }
    Ok(CacheResult::from_network(item, None))
  }

  /// Look an entity up in the cached list, only while the list is fresh.
  pub async fn peek(&self, id: &T::Key) -> Option<T> {
    let mut state = self.state.lock().await;
    self.restore(&mut state).await;
    if !self.is_fresh(state.last_updated) {
      return None;
    }
    state.items.iter().find(|item| item.cache_key() == *id).cloned()
  }

  /// Drop one entity from memory and from the local store.
  ///
  /// Persisted lists that still name it are no longer fresh when restored.
  pub async fn invalidate(&self, id: &T::Key) -> Result<()> {
    let mut state = self.state.lock().await;
    state.items.retain(|item| item.cache_key() != *id);
    self.storage.delete::<T>(id).await
  }

  /// Force the next `fetch_list` of every list of this type to go to the
  /// network. Persisted keys stay available as the offline fallback.
  pub async fn mark_stale(&self) {
    let mut state = self.state.lock().await;
    state.last_updated = None;
    if let Err(e) = meta::mark_stale(&self.storage, T::entity_type()).await {
      tracing::warn!(entity = T::entity_type(), error = %e, "failed to mark lists stale");
    }
  }

  /// Forget everything cached for this entity type.
  pub async fn clear_all(&self) -> Result<()> {
    let mut state = self.state.lock().await;
    state.items.clear();
    state.last_updated = None;
    state.total = None;
    state.restored = true;
    meta::clear(&self.storage, T::entity_type()).await?;
    self.storage.clear::<T>().await
  }

  pub async fn last_updated(&self) -> Option<i64> {
    let mut state = self.state.lock().await;
    self.restore(&mut state).await;
    state.last_updated
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clock::ManualClock;
  use crate::cache::storage::StoreLocation;
  use crate::cache::CacheSource;
  use crate::event::EventHandler;
  use serde::{Deserialize, Serialize};
  use std::sync::atomic::{AtomicUsize, Ordering};

  const TTL_MS: u64 = 300_000;
  const START: i64 = 1_700_000_000_000;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Item {
    id: String,
  }

  impl Cacheable for Item {
    type Key = String;

    fn cache_key(&self) -> String {
      self.id.clone()
    }

    fn entity_type() -> &'static str {
      "items"
    }
  }

  fn items(ids: &[&str]) -> Vec<Item> {
    ids.iter().map(|id| Item { id: id.to_string() }).collect()
  }

  struct Harness {
    cache: TimedCache<Item>,
    storage: Arc<SqliteStorage>,
    clock: Arc<ManualClock>,
    calls: AtomicUsize,
    events: EventHandler,
  }

  impl Harness {
    async fn new() -> Self {
      let storage = Arc::new(SqliteStorage::new(StoreLocation::Memory, 1, &["items"]));
      storage.open().await.unwrap();
      let clock = Arc::new(ManualClock::new(START));
      let events = EventHandler::new();
      let cache = TimedCache::new(
        Arc::clone(&storage),
        Duration::from_millis(TTL_MS),
        events.notifier(),
      )
      .with_clock(clock.clone());

      Self {
        cache,
        storage,
        clock,
        calls: AtomicUsize::new(0),
        events,
      }
    }

    async fn fetch(&self, force: bool, result: Result<Vec<Item>>) -> Result<CacheResult<Vec<Item>>> {
      self
        .cache
        .fetch_list(force, || async {
          self.calls.fetch_add(1, Ordering::SeqCst);
          result.map(Page::complete)
        })
        .await
    }

    /// A new cache over the same store, as in the next run of the program
    fn restart(&mut self) {
      self.cache = TimedCache::new(
        Arc::clone(&self.storage),
        Duration::from_millis(TTL_MS),
        self.events.notifier(),
      )
      .with_clock(self.clock.clone());
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  fn offline() -> ClientError {
    ClientError::Remote {
      status: None,
      message: "connection refused".into(),
    }
  }

  #[tokio::test]
  async fn serves_cached_list_within_ttl() {
    let h = Harness::new().await;
    h.fetch(false, Ok(items(&["a", "b", "c"]))).await.unwrap();
    assert_eq!(h.calls(), 1);

    h.clock.advance(100);
    let result = h.fetch(false, Ok(items(&["x"]))).await.unwrap();

    assert_eq!(h.calls(), 1);
    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(result.data, items(&["a", "b", "c"]));
  }

  #[tokio::test]
  async fn refetches_after_ttl_and_updates_timestamp() {
    let h = Harness::new().await;
    h.fetch(false, Ok(items(&["a", "b", "c"]))).await.unwrap();
    assert_eq!(h.cache.last_updated().await, Some(START));

    h.clock.advance(400_000);
    let result = h.fetch(false, Ok(items(&["d"]))).await.unwrap();

    assert_eq!(h.calls(), 2);
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, items(&["d"]));
    assert_eq!(h.cache.last_updated().await, Some(START + 400_000));
  }

  #[tokio::test]
  async fn forced_refresh_always_hits_network_once() {
    let h = Harness::new().await;
    h.fetch(false, Ok(items(&["a"]))).await.unwrap();

    let result = h.fetch(true, Ok(items(&["a", "b"]))).await.unwrap();

    assert_eq!(h.calls(), 2);
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.total, Some(2));
  }

  #[tokio::test]
  async fn empty_cached_list_is_refetched() {
    let h = Harness::new().await;
    h.fetch(false, Ok(Vec::new())).await.unwrap();
    h.fetch(false, Ok(Vec::new())).await.unwrap();

    assert_eq!(h.calls(), 2);
  }

  #[tokio::test]
  async fn fetched_items_are_written_through() {
    let h = Harness::new().await;
    h.fetch(false, Ok(items(&["a", "b"]))).await.unwrap();

    let stored: Vec<Item> = h.storage.get_all().await.unwrap();
    assert_eq!(stored, items(&["a", "b"]));
  }

  #[tokio::test]
  async fn failed_refresh_keeps_stale_data_and_notifies() {
    let mut h = Harness::new().await;
    h.fetch(false, Ok(items(&["a", "b"]))).await.unwrap();

    let result = h.fetch(true, Err(offline())).await.unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, items(&["a", "b"]));
    assert_eq!(h.cache.last_updated().await, Some(START));
    assert!(matches!(h.events.try_next(), Some(Notice::Error(_))));
  }

  #[tokio::test]
  async fn failure_with_empty_cache_is_raised() {
    let h = Harness::new().await;

    let err = h.fetch(false, Err(offline())).await.unwrap_err();

    assert_eq!(err, offline());
  }

  #[tokio::test]
  async fn failure_after_restart_serves_last_list() {
    let mut h = Harness::new().await;
    h.fetch(false, Ok(items(&["p", "q"]))).await.unwrap();
    h.storage.put(&Item { id: "other".into() }).await.unwrap();

    h.restart();
    h.clock.advance(TTL_MS as i64);
    let result = h.fetch(false, Err(offline())).await.unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, items(&["p", "q"]));
    assert_eq!(result.total, Some(2));
  }

  #[tokio::test]
  async fn records_without_a_fetched_list_are_not_a_fallback() {
    let h = Harness::new().await;
    h.storage.bulk_put(&items(&["p", "q"])).await.unwrap();

    let err = h.fetch(false, Err(offline())).await.unwrap_err();

    assert_eq!(err, offline());
  }

  #[tokio::test]
  async fn freshness_survives_restart() {
    let mut h = Harness::new().await;
    h.fetch(false, Ok(items(&["a", "b", "c"]))).await.unwrap();

    h.restart();
    h.clock.advance(100);
    let result = h.fetch(false, Ok(items(&["x"]))).await.unwrap();

    assert_eq!(h.calls(), 1);
    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(result.data, items(&["a", "b", "c"]));
    assert_eq!(h.cache.last_updated().await, Some(START));
  }

  #[tokio::test]
  async fn restored_list_still_expires() {
    let mut h = Harness::new().await;
    h.fetch(false, Ok(items(&["a"]))).await.unwrap();

    h.restart();
    h.clock.advance(400_000);
    h.fetch(false, Ok(items(&["b"]))).await.unwrap();

    assert_eq!(h.calls(), 2);
  }

  #[tokio::test]
  async fn restored_list_missing_a_record_is_refetched() {
    let mut h = Harness::new().await;
    h.fetch(false, Ok(items(&["a", "b"]))).await.unwrap();
    h.cache.invalidate(&"a".to_string()).await.unwrap();

    h.restart();
    let result = h.fetch(false, Ok(items(&["b"]))).await.unwrap();

    assert_eq!(h.calls(), 2);
    assert_eq!(result.source, CacheSource::Network);
  }

  #[tokio::test]
  async fn stale_mark_survives_restart() {
    let mut h = Harness::new().await;
    h.fetch(false, Ok(items(&["a"]))).await.unwrap();
    h.cache.mark_stale().await;

    h.restart();
    h.fetch(false, Ok(items(&["a"]))).await.unwrap();

    assert_eq!(h.calls(), 2);
  }

  #[tokio::test]
  async fn scopes_hold_separate_lists() {
    let h = Harness::new().await;
    h.cache.set_scope("page=1").await;
    h.fetch(false, Ok(items(&["a", "b"]))).await.unwrap();
    h.cache.set_scope("page=2").await;
    h.fetch(false, Ok(items(&["c"]))).await.unwrap();

    h.cache.set_scope("page=1").await;
    let page_one = h.fetch(false, Ok(Vec::new())).await.unwrap();

    assert_eq!(h.calls(), 2);
    assert_eq!(page_one.source, CacheSource::CacheFresh);
    assert_eq!(page_one.data, items(&["a", "b"]));
  }

  #[tokio::test]
  async fn auth_expiry_is_never_swallowed() {
    let h = Harness::new().await;
    h.fetch(false, Ok(items(&["a"]))).await.unwrap();

    let err = h.fetch(true, Err(ClientError::AuthExpired)).await.unwrap_err();

    assert_eq!(err, ClientError::AuthExpired);
  }

  #[tokio::test]
  async fn concurrent_fetches_coalesce() {
    let h = Harness::new().await;

    let (a, b) = tokio::join!(
      h.fetch(false, Ok(items(&["a"]))),
      h.fetch(false, Ok(items(&["b"])))
    );

    assert_eq!(h.calls(), 1);
    assert_eq!(a.unwrap().data, b.unwrap().data);
  }

  #[tokio::test]
  async fn fetch_one_prefers_local_store() {
    let h = Harness::new().await;
    h.storage.put(&Item { id: "a".into() }).await.unwrap();

    let result = h
      .cache
      .fetch_one(&"a".to_string(), || async {
        h.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Item { id: "a".into() })
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(h.calls(), 0);
  }

  #[tokio::test]
  async fn fetch_one_fetches_and_stores_on_miss() {
    let h = Harness::new().await;
    let id = "z".to_string();

    let result = h
      .cache
      .fetch_one(&id, || async { Ok(Item { id: "z".into() }) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    let stored: Option<Item> = h.storage.get(&id).await.unwrap();
    assert_eq!(stored, Some(Item { id: "z".into() }));
  }

  #[tokio::test]
  async fn fetch_one_propagates_not_found() {
    let h = Harness::new().await;

    let err = h
      .cache
      .fetch_one(&"missing".to_string(), || async {
        Err(ClientError::NotFound {
          entity: "item",
          id: "missing".into(),
        })
      })
      .await
      .unwrap_err();

    assert!(matches!(err, ClientError::NotFound { .. }));
  }

  #[tokio::test]
  async fn invalidate_removes_from_memory_and_store() {
    let h = Harness::new().await;
    h.fetch(false, Ok(items(&["a", "b"]))).await.unwrap();

    h.cache.invalidate(&"a".to_string()).await.unwrap();

    let cached = h.fetch(false, Ok(Vec::new())).await.unwrap();
    assert_eq!(cached.data, items(&["b"]));
    assert_eq!(h.storage.get_all::<Item>().await.unwrap(), items(&["b"]));
  }

  #[tokio::test]
  async fn clear_all_forces_refetch() {
    let h = Harness::new().await;
    h.fetch(false, Ok(items(&["a"]))).await.unwrap();

    h.cache.clear_all().await.unwrap();

    assert!(h.storage.get_all::<Item>().await.unwrap().is_empty());
    h.fetch(false, Ok(items(&["b"]))).await.unwrap();
    assert_eq!(h.calls(), 2);
  }

  #[tokio::test]
  async fn peek_only_answers_while_fresh() {
    let h = Harness::new().await;
    h.fetch(false, Ok(items(&["a"]))).await.unwrap();
    let id = "a".to_string();

    assert_eq!(h.cache.peek(&id).await, Some(Item { id: id.clone() }));

    h.clock.advance(TTL_MS as i64);
    assert_eq!(h.cache.peek(&id).await, None);
  }
}
