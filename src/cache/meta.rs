//! List bookkeeping for [`super::TimedCache`].
//!
//! For every list a cache has fetched (one per entity type and scope, e.g.
//! per page) this remembers when it was fetched, the server total, and the
//! keys of its records in order. The records themselves stay in the
//! per-entity tables of the store.

use rusqlite::{params, Connection, OptionalExtension};

use super::storage::SqliteStorage;
use crate::error::{ClientError, Result};

const TABLE: &str = "CREATE TABLE IF NOT EXISTS cache_meta (
    entity TEXT NOT NULL,
    scope TEXT NOT NULL,
    last_updated INTEGER,
    total INTEGER,
    keys TEXT NOT NULL,
    PRIMARY KEY (entity, scope)
);";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ListMeta {
  /// Epoch milliseconds of the fetch; `None` once the list was marked stale
  pub last_updated: Option<i64>,
  pub total: Option<u64>,
  pub keys: Vec<String>,
}

fn ensure_table(conn: &Connection) -> Result<()> {
  conn.execute_batch(TABLE)?;
  Ok(())
}

pub(super) async fn load(
  storage: &SqliteStorage,
  entity: &'static str,
  scope: &str,
) -> Result<Option<ListMeta>> {
  let scope = scope.to_string();

  let row = storage
    .with_conn(move |conn| {
      ensure_table(conn)?;
      let row = conn
        .query_row(
          "SELECT last_updated, total, keys FROM cache_meta WHERE entity = ?1 AND scope = ?2",
          params![entity, scope],
          |row| {
            Ok((
              row.get::<_, Option<i64>>(0)?,
              row.get::<_, Option<i64>>(1)?,
              row.get::<_, String>(2)?,
            ))
          },
        )
        .optional()?;
      Ok(row)
    })
    .await?;

  let Some((last_updated, total, keys)) = row else {
    return Ok(None);
  };
  let keys = serde_json::from_str(&keys)
    .map_err(|e| ClientError::storage(format!("Corrupt {entity} list metadata: {e}")))?;

  Ok(Some(ListMeta {
    last_updated,
    total: total.and_then(|t| u64::try_from(t).ok()),
    keys,
  }))
}

pub(super) async fn save(
  storage: &SqliteStorage,
  entity: &'static str,
  scope: &str,
  meta: ListMeta,
) -> Result<()> {
  let scope = scope.to_string();
  let keys = serde_json::to_string(&meta.keys)
    .map_err(|e| ClientError::storage(format!("Failed to serialize {entity} keys: {e}")))?;
  let total = meta.total.and_then(|t| i64::try_from(t).ok());

  storage
    .with_conn(move |conn| {
      ensure_table(conn)?;
      conn.execute(
        "INSERT OR REPLACE INTO cache_meta (entity, scope, last_updated, total, keys)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![entity, scope, meta.last_updated, total, keys],
      )?;
      Ok(())
    })
    .await
}

/// Make every list of `entity` stale while keeping its keys for offline use.
pub(super) async fn mark_stale(storage: &SqliteStorage, entity: &'static str) -> Result<()> {
  storage
    .with_conn(move |conn| {
      ensure_table(conn)?;
      conn.execute(
        "UPDATE cache_meta SET last_updated = NULL WHERE entity = ?1",
        params![entity],
      )?;
      Ok(())
    })
    .await
}

pub(super) async fn clear(storage: &SqliteStorage, entity: &'static str) -> Result<()> {
  storage
    .with_conn(move |conn| {
      ensure_table(conn)?;
      conn.execute("DELETE FROM cache_meta WHERE entity = ?1", params![entity])?;
      Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::StoreLocation;

  async fn open_memory() -> SqliteStorage {
    let storage = SqliteStorage::new(StoreLocation::Memory, 1, &["books"]);
    storage.open().await.unwrap();
    storage
  }

  fn meta(at: i64, keys: &[&str]) -> ListMeta {
    ListMeta {
      last_updated: Some(at),
      total: Some(40),
      keys: keys.iter().map(|k| k.to_string()).collect(),
    }
  }

  #[tokio::test]
  async fn lists_are_kept_per_scope() {
    let storage = open_memory().await;

    save(&storage, "books", "page=1", meta(10, &["a", "b"])).await.unwrap();
    save(&storage, "books", "page=2", meta(20, &["c"])).await.unwrap();

    assert_eq!(
      load(&storage, "books", "page=2").await.unwrap(),
      Some(meta(20, &["c"]))
    );
    assert_eq!(load(&storage, "books", "page=3").await.unwrap(), None);
    assert_eq!(load(&storage, "users", "page=1").await.unwrap(), None);
  }

  #[tokio::test]
  async fn stale_lists_keep_their_keys() {
    let storage = open_memory().await;
    save(&storage, "books", "", meta(10, &["a"])).await.unwrap();

    mark_stale(&storage, "books").await.unwrap();

    let loaded = load(&storage, "books", "").await.unwrap().unwrap();
    assert_eq!(loaded.last_updated, None);
    assert_eq!(loaded.keys, vec!["a".to_string()]);

    clear(&storage, "books").await.unwrap();
    assert_eq!(load(&storage, "books", "").await.unwrap(), None);
  }
}
