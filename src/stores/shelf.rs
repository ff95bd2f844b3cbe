use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::api::{ApiClient, ShelfItem};
use crate::cache::{CacheResult, SqliteStorage, TimedCache};
use crate::error::Result;
use crate::event::Notifier;

/// The current user's bookshelf.
pub struct ShelfStore {
  api: ApiClient,
  cache: TimedCache<ShelfItem>,
  ttl: Duration,
}

impl ShelfStore {
  pub fn new(api: ApiClient, storage: Arc<SqliteStorage>, ttl: Duration, notifier: Notifier) -> Self {
    Self {
      api,
      cache: TimedCache::new(storage, ttl, notifier),
      ttl,
    }
  }

  pub async fn fetch_shelf(&self, force_refresh: bool) -> Result<CacheResult<Vec<ShelfItem>>> {
    self
      .cache
      .fetch_list(force_refresh, || self.api.list_shelf())
      .await
  }

  /// Refresh the shelf every `period` until the returned task is aborted.
  ///
  /// Failures are logged and the next tick tries again.
  pub fn spawn_auto_refresh(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(period);
      interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        interval.tick().await;
        if let Err(e) = self.fetch_shelf(true).await {
          tracing::warn!(error = %e, "automatic shelf refresh failed");
        }
      }
    })
  }

  /// How often the shelf goes stale
  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// When the shelf was last fetched from the network, in epoch millis
  pub async fn last_updated(&self) -> Option<i64> {
    self.cache.last_updated().await
  }

  pub async fn clear_cache(&self) -> Result<()> {
    self.cache.clear_all().await
  }
}
