//! Key-value object store backed by SQLite.
//!
//! One table per entity type, keyed by the entity's natural key. The store
//! knows nothing about freshness; that lives in [`super::TimedCache`].

use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::traits::Cacheable;
use crate::error::{ClientError, Result};

/// Where the database lives.
#[derive(Debug, Clone)]
pub enum StoreLocation {
  File(PathBuf),
  Memory,
}

/// SQLite-based object store.
///
/// Every operation runs on the blocking pool and fails with
/// [`ClientError::Storage`] until [`SqliteStorage::open`] has succeeded.
pub struct SqliteStorage {
  location: StoreLocation,
  version: u32,
  tables: Vec<&'static str>,
  conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStorage {
  /// Describe a store; nothing touches disk until `open`.
  pub fn new(location: StoreLocation, version: u32, tables: &[&'static str]) -> Self {
    Self {
      location,
      version,
      tables: tables.to_vec(),
      conn: Arc::new(Mutex::new(None)),
    }
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| ClientError::Storage("Could not determine data directory".into()))?;

    Ok(data_dir.join("shelf").join("cache.db"))
  }

  /// Open the database and bring the schema up to `version`.
  ///
  /// Calling `open` on an already open store is a no-op.
  pub async fn open(&self) -> Result<()> {
    let slot = Arc::clone(&self.conn);
    let location = self.location.clone();
    let version = self.version;
    let tables = self.tables.clone();

    run_blocking(move || {
      let mut guard = slot
        .lock()
        .map_err(|e| ClientError::storage(format!("Lock poisoned: {e}")))?;
      if guard.is_some() {
        return Ok(());
      }

      let mut conn = match &location {
        StoreLocation::File(path) => {
          if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
              ClientError::storage(format!("Failed to create cache directory: {e}"))
            })?;
          }
          Connection::open(path).map_err(|e| {
            ClientError::storage(format!(
              "Failed to open cache database at {}: {e}",
              path.display()
            ))
          })?
        }
        StoreLocation::Memory => Connection::open_in_memory()?,
      };

      run_migrations(&mut conn, version, &tables)?;
      tracing::debug!(version, ?tables, "cache store opened");
      *guard = Some(conn);
      Ok(())
    })
    .await
  }

  /// Insert or replace a single record.
  pub async fn put<T: Cacheable>(&self, item: &T) -> Result<()> {
    self.bulk_put(std::slice::from_ref(item)).await
  }

  /// Insert or replace a batch of records in one transaction.
  ///
  /// Either every record is written or none is.
  pub async fn bulk_put<T: Cacheable>(&self, items: &[T]) -> Result<()> {
    let table = self.table::<T>()?;
    let rows = items
      .iter()
      .map(|item| {
        let data = serde_json::to_vec(item)
          .map_err(|e| ClientError::storage(format!("Failed to serialize entity: {e}")))?;
        Ok((item.cache_key().to_string(), data))
      })
      .collect::<Result<Vec<_>>>()?;

    self
      .with_conn(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(&format!(
            "INSERT OR REPLACE INTO \"{table}\" (key, data) VALUES (?1, ?2)"
          ))?;
          for (key, data) in &rows {
            if key.is_empty() {
              return Err(ClientError::Storage(format!(
                "Refusing to store {table} record with an empty key"
              )));
            }
            stmt.execute(params![key, data])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await
  }

  pub async fn get<T: Cacheable>(&self, key: &T::Key) -> Result<Option<T>> {
    let table = self.table::<T>()?;
    let key = key.to_string();

    let data = self
      .with_conn(move |conn| {
        let data: Option<Vec<u8>> = conn
          .query_row(
            &format!("SELECT data FROM \"{table}\" WHERE key = ?1"),
            params![key],
            |row| row.get(0),
          )
          .optional()?;
        Ok(data)
      })
      .await?;

    data.map(|bytes| decode(table, &bytes)).transpose()
  }

  /// The records stored under `keys`, in the order given.
  ///
  /// Keys with no record are skipped.
  pub async fn get_many<T: Cacheable>(&self, keys: &[String]) -> Result<Vec<T>> {
    let table = self.table::<T>()?;
    let keys = keys.to_vec();

    let rows = self
      .with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!("SELECT data FROM \"{table}\" WHERE key = ?1"))?;
        let mut rows = Vec::with_capacity(keys.len());
        for key in &keys {
          let data: Option<Vec<u8>> = stmt
            .query_row(params![key], |row| row.get(0))
            .optional()?;
          rows.extend(data);
        }
        Ok(rows)
      })
      .await?;

    rows.iter().map(|bytes| decode(table, bytes)).collect()
  }

  /// All records of the entity type, in key order.
  pub async fn get_all<T: Cacheable>(&self) -> Result<Vec<T>> {
    let table = self.table::<T>()?;

    let rows = self
      .with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!("SELECT data FROM \"{table}\" ORDER BY key"))?;
        let rows = stmt
          .query_map([], |row| row.get::<_, Vec<u8>>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows.iter().map(|bytes| decode(table, bytes)).collect()
  }

  pub async fn delete<T: Cacheable>(&self, key: &T::Key) -> Result<()> {
    let table = self.table::<T>()?;
    let key = key.to_string();

    self
      .with_conn(move |conn| {
        conn.execute(&format!("DELETE FROM \"{table}\" WHERE key = ?1"), params![key])?;
        Ok(())
      })
      .await
  }

  /// Remove every record of the entity type.
  pub async fn clear<T: Cacheable>(&self) -> Result<()> {
    let table = self.table::<T>()?;

    self
      .with_conn(move |conn| {
        conn.execute(&format!("DELETE FROM \"{table}\""), [])?;
        Ok(())
      })
      .await
  }

  fn table<T: Cacheable>(&self) -> Result<&'static str> {
    let table = T::entity_type();
    if self.tables.contains(&table) {
      Ok(table)
    } else {
      Err(ClientError::Storage(format!(
        "Table {table} is not part of the cache schema"
      )))
    }
  }

  /// Run `f` against the open connection on the blocking pool.
  pub(super) async fn with_conn<R, F>(&self, f: F) -> Result<R>
  where
    R: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
  {
    let slot = Arc::clone(&self.conn);
    run_blocking(move || {
      let mut guard = slot
        .lock()
        .map_err(|e| ClientError::storage(format!("Lock poisoned: {e}")))?;
      let conn = guard
        .as_mut()
        .ok_or_else(|| ClientError::Storage("Cache store has not been opened".into()))?;
      f(conn)
    })
    .await
  }
}

async fn run_blocking<R, F>(f: F) -> Result<R>
where
  R: Send + 'static,
  F: FnOnce() -> Result<R> + Send + 'static,
{
  tokio::task::spawn_blocking(f)
    .await
    .map_err(|e| ClientError::storage(format!("Storage task failed: {e}")))?
}

/// Bring the schema up to `version`, creating missing tables.
///
/// Tables are only created if absent, so re-running an upgrade is harmless.
/// A database written by a newer schema is refused.
fn run_migrations(conn: &mut Connection, version: u32, tables: &[&'static str]) -> Result<()> {
  if version == 0 {
    return Err(ClientError::Storage(
      "Cache schema version must be at least 1".into(),
    ));
  }

  let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
  if current > version {
    return Err(ClientError::Storage(format!(
      "Cache database is at schema version {current}, newer than requested {version}"
    )));
  }
  if current == version {
    return Ok(());
  }

  let tx = conn.transaction()?;
  for table in tables {
    tx.execute_batch(&format!(
      "CREATE TABLE IF NOT EXISTS \"{table}\" (
          key TEXT PRIMARY KEY,
          data BLOB NOT NULL
      );"
    ))?;
  }
  tx.pragma_update(None, "user_version", version)?;
  tx.commit()?;

  tracing::info!(from = current, to = version, "cache schema upgraded");
  Ok(())
}

fn decode<T: Cacheable>(table: &str, bytes: &[u8]) -> Result<T> {
  serde_json::from_slice(bytes)
    .map_err(|e| ClientError::storage(format!("Corrupt {table} record in cache: {e}")))
}
