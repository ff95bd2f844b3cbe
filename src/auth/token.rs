use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{ClientError, Result};

/// Where the bearer token survives between runs.
pub enum TokenStore {
  File(PathBuf),
  Memory(Mutex<Option<String>>),
}

impl TokenStore {
  pub fn memory() -> Self {
    Self::Memory(Mutex::new(None))
  }

  /// Get the default token path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| ClientError::Storage("Could not determine data directory".into()))?;

    Ok(data_dir.join("shelf").join("token"))
  }

  pub fn load(&self) -> Result<Option<String>> {
    match self {
      Self::File(path) => match std::fs::read_to_string(path) {
        Ok(contents) => {
          let token = contents.trim();
          Ok((!token.is_empty()).then(|| token.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ClientError::storage(format!(
          "Failed to read token file {}: {e}",
          path.display()
        ))),
      },
      Self::Memory(slot) => Ok(lock(slot)?.clone()),
    }
  }

  pub fn save(&self, token: &str) -> Result<()> {
    match self {
      Self::File(path) => {
        if let Some(parent) = path.parent() {
          std::fs::create_dir_all(parent).map_err(|e| {
            ClientError::storage(format!("Failed to create token directory: {e}"))
          })?;
        }
        std::fs::write(path, token).map_err(|e| {
          ClientError::storage(format!("Failed to write token file {}: {e}", path.display()))
        })
      }
      Self::Memory(slot) => {
        *lock(slot)? = Some(token.to_string());
        Ok(())
      }
    }
  }

  pub fn clear(&self) -> Result<()> {
    match self {
      Self::File(path) => match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ClientError::storage(format!(
          "Failed to remove token file {}: {e}",
          path.display()
        ))),
      },
      Self::Memory(slot) => {
        *lock(slot)? = None;
        Ok(())
      }
    }
  }
}

fn lock(slot: &Mutex<Option<String>>) -> Result<std::sync::MutexGuard<'_, Option<String>>> {
  slot
    .lock()
    .map_err(|e| ClientError::storage(format!("Lock poisoned: {e}")))
}
