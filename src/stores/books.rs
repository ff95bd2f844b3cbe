use std::sync::Arc;
use std::time::Duration;

use super::{page_scope, PageCursor, Pagination};
use crate::api::{ApiClient, Book};
use crate::cache::{CacheResult, Page, SqliteStorage, TimedCache};
use crate::error::Result;
use crate::event::{Notice, Notifier};

/// Book catalogue with a TTL-bounded list cache.
pub struct BookStore {
  api: ApiClient,
  cache: TimedCache<Book>,
  pagination: PageCursor,
  notifier: Notifier,
}

impl BookStore {
  pub fn new(
    api: ApiClient,
    storage: Arc<SqliteStorage>,
    ttl: Duration,
    page_size: u32,
    notifier: Notifier,
  ) -> Self {
    Self {
      api,
      cache: TimedCache::new(storage, ttl, notifier.clone()).with_scope(page_scope(1, page_size)),
      pagination: PageCursor::new(page_size),
      notifier,
    }
  }

  #[cfg(test)]
  fn with_cache(mut self, f: impl FnOnce(TimedCache<Book>) -> TimedCache<Book>) -> Self {
    self.cache = f(self.cache);
    self
  }

  pub fn pagination(&self) -> Pagination {
    self.pagination.get()
  }

  /// Move to another page; a page fetched within the TTL is served from cache.
  pub async fn set_page(&self, page: u32) {
    let page = page.max(1);
    self.pagination.update(|p| p.current_page = page);
    let size = self.pagination.get().page_size;
    self.cache.set_scope(page_scope(page, size)).await;
  }

  /// Books on the current page
  pub async fn fetch_books(&self, force_refresh: bool) -> Result<CacheResult<Vec<Book>>> {
    let Pagination {
      current_page,
      page_size,
      ..
    } = self.pagination.get();

    let result = self
      .cache
      .fetch_list(force_refresh, || self.api.list_books(current_page, page_size))
      .await?;

    if let Some(total) = result.total {
      self.pagination.update(|p| p.total = total);
    }
    Ok(result)
  }

  /// A single book, from the local store when possible
  pub async fn book(&self, isbn: &str) -> Result<Book> {
    let isbn = isbn.to_string();
    let result = self
      .cache
      .fetch_one(&isbn, || self.api.get_book(&isbn))
      .await?;
    Ok(result.data)
  }

  /// Search is never cached
  pub async fn search_books(&self, params: &[(String, String)]) -> Result<Page<Book>> {
    self.api.search_books(params).await
  }

  pub async fn delete_book(&self, isbn: &str) -> Result<()> {
    self.api.delete_book(isbn).await?;

    if let Err(e) = self.cache.invalidate(&isbn.to_string()).await {
      tracing::warn!(isbn, error = %e, "failed to drop deleted book from cache");
    }
    self.notifier.send(Notice::Success(format!("Deleted book {isbn}")));
    Ok(())
  }

  pub async fn clear_cache(&self) -> Result<()> {
    self.cache.clear_all().await
  }
}
