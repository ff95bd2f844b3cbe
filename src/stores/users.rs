use std::sync::Arc;
use std::time::Duration;

use super::{page_scope, PageCursor, Pagination};
use crate::api::{ApiClient, NewUser, Role, User};
use crate::auth::hash_password;
use crate::cache::{CacheResult, SqliteStorage, TimedCache};
use crate::error::Result;
use crate::event::{Notice, Notifier};

/// User administration with a short-lived list cache.
pub struct UserStore {
  api: ApiClient,
  cache: TimedCache<User>,
  pagination: PageCursor,
  notifier: Notifier,
}

impl UserStore {
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

  pub fn pagination(&self) -> Pagination {
    self.pagination.get()
  }

  pub async fn set_page(&self, page: u32) {
    let page = page.max(1);
    self.pagination.update(|p| p.current_page = page);
    let size = self.pagination.get().page_size;
    self.cache.set_scope(page_scope(page, size)).await;
  }

  pub async fn fetch_users(&self, force_refresh: bool) -> Result<CacheResult<Vec<User>>> {
    let Pagination {
      current_page,
      page_size,
      ..
    } = self.pagination.get();

    let result = self
      .cache
      .fetch_list(force_refresh, || self.api.list_users(current_page, page_size))
      .await?;

    if let Some(total) = result.total {
      self.pagination.update(|p| p.total = total);
    }
    Ok(result)
  }

  /// A user from the list fetched within the TTL, without any I/O
  pub async fn cached_user(&self, user_id: &str) -> Option<User> {
    self.cache.peek(&user_id.to_string()).await
  }

  pub async fn user(&self, user_id: &str) -> Result<User> {
    let user_id = user_id.to_string();
    let result = self
      .cache
      .fetch_one(&user_id, || self.api.get_user(&user_id))
      .await?;
    Ok(result.data)
  }

  /// Create a user and reload the list. The password is hashed the same way
  /// login hashes it.
  pub async fn create_user(&self, username: &str, password: &str, role: Role) -> Result<()> {
    let new_user = NewUser {
      username: username.to_string(),
      password: hash_password(password),
      role,
    };
    self.api.create_user(&new_user).await?;
    self
      .notifier
      .send(Notice::Success(format!("Created user {username}")));

    self.reload().await;
    Ok(())
  }

  pub async fn delete_user(&self, user_id: &str) -> Result<()> {
    self.api.delete_user(user_id).await?;
    if let Err(e) = self.cache.invalidate(&user_id.to_string()).await {
      tracing::warn!(user_id, error = %e, "failed to drop deleted user from cache");
    }
    self
      .notifier
      .send(Notice::Success(format!("Deleted user {user_id}")));

    self.reload().await;
    Ok(())
  }

  /// Refresh the list after a change on the server.
  ///
  /// The change already happened, so a failed refresh only leaves the list
  /// stale for the next fetch.
  async fn reload(&self) {
    self.cache.mark_stale().await;
    if let Err(e) = self.fetch_users(true).await {
      tracing::warn!(error = %e, "could not reload users after change");
    }
  }

  pub async fn clear_cache(&self) -> Result<()> {
    self.cache.clear_all().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::ScriptedTransport;
  use crate::auth::{Session, TokenStore};
  use crate::cache::{CacheSource, StoreLocation};
  use crate::error::ClientError;
  use crate::event::EventHandler;
  use reqwest::Method;
  use serde_json::json;
  use std::sync::atomic::{AtomicBool, Ordering};

  struct Fixture {
    store: UserStore,
    transport: Arc<ScriptedTransport>,
    events: EventHandler,
  }

  async fn fixture(transport: ScriptedTransport) -> Fixture {
    let events = EventHandler::new();
    let session = Arc::new(Session::new(TokenStore::memory(), events.notifier()));
    let transport = Arc::new(transport);
    let api = ApiClient::new(transport.clone(), session, events.notifier());
    let storage = Arc::new(SqliteStorage::new(StoreLocation::Memory, 1, &["users"]));
    storage.open().await.unwrap();
    let store = UserStore::new(api, storage, Duration::from_secs(300), 10, events.notifier());
    Fixture {
      store,
      transport,
      events,
    }
  }

  fn directory() -> ScriptedTransport {
    let deleted = AtomicBool::new(false);
    ScriptedTransport::new(move |request| match (&request.method, request.path.as_str()) {
      (&Method::GET, "/api/users") => {
        let mut users = vec![json!({"user_id": 2, "username": "reader", "role": "user"})];
        if !deleted.load(Ordering::SeqCst) {
          users.insert(0, json!({"user_id": 1, "username": "admin", "role": "admin"}));
        }
        ScriptedTransport::json(200, json!({"total": users.len(), "users": users}))
      }
      (&Method::DELETE, "/api/users/1") => {
        deleted.store(true, Ordering::SeqCst);
        ScriptedTransport::json(200, json!({"message": "User deleted"}))
      }
      (&Method::POST, "/api/users") => ScriptedTransport::json(201, json!({"message": "created"})),
      (&Method::GET, "/api/users/9") => ScriptedTransport::json(
        200,
        json!({"user_id": "9", "username": "guest", "role": "user"}),
      ),
      _ => ScriptedTransport::json(404, json!({"message": "not found"})),
    })
  }

  #[tokio::test]
  async fn list_is_cached_and_ids_normalized() {
    let f = fixture(directory()).await;

    let first = f.store.fetch_users(false).await.unwrap();
    let second = f.store.fetch_users(false).await.unwrap();

    assert_eq!(first.data[0].user_id, "1");
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(f.store.pagination().total, 2);
    assert_eq!(f.transport.count("/api/users"), 1);
  }

  #[tokio::test]
  async fn cached_user_answers_from_fresh_list() {
    let f = fixture(directory()).await;
    assert_eq!(f.store.cached_user("2").await, None);

    f.store.fetch_users(false).await.unwrap();

    assert_eq!(
      f.store.cached_user("2").await.map(|u| u.username).as_deref(),
      Some("reader")
    );
  }

  #[tokio::test]
  async fn delete_invalidates_and_reloads() {
    let mut f = fixture(directory()).await;
    f.store.fetch_users(false).await.unwrap();
    f.events.drain();

    f.store.delete_user("1").await.unwrap();

    assert_eq!(f.store.cached_user("1").await, None);
    assert_eq!(f.transport.count("/api/users"), 2);
    assert_eq!(
      f.events.drain(),
      vec![Notice::Success("Deleted user 1".into())]
    );
  }

  #[tokio::test]
  async fn create_sends_hashed_password_and_reloads() {
    let f = fixture(directory()).await;

    f.store.create_user("newbie", "pw", Role::User).await.unwrap();

    let sent = f.transport.requests();
    let create = sent
      .iter()
      .find(|r| r.method == Method::POST)
      .and_then(|r| r.body.clone())
      .unwrap();
    assert_eq!(create["password"], json!(hash_password("pw")));
    assert_eq!(create["role"], json!("user"));
    assert_eq!(sent.iter().filter(|r| r.method == Method::GET).count(), 1);
  }

  #[tokio::test]
  async fn completed_change_is_reported_even_if_reload_fails() {
    let f = fixture(ScriptedTransport::new(|request| match &request.method {
      &Method::DELETE => ScriptedTransport::json(200, json!({"message": "User deleted"})),
      _ => Err(ClientError::Remote {
        status: None,
        message: "connection refused".into(),
      }),
    }))
    .await;

    f.store.delete_user("1").await.unwrap();

    assert_eq!(f.transport.count("/api/users/1"), 1);
    assert_eq!(f.transport.count("/api/users"), 1);
  }

  #[tokio::test]
  async fn single_user_is_fetched_by_id() {
    let f = fixture(directory()).await;

    let user = f.store.user("9").await.unwrap();

    assert_eq!(user.username, "guest");
  }
}
