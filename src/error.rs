//! Error taxonomy shared by the store, cache, API and auth layers.

use thiserror::Error;

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
  /// Local persistence unavailable, never opened, or rejected the operation
  #[error("Storage error: {0}")]
  Storage(String),

  /// Network or API failure; `status` is absent when no response arrived
  #[error("Request failed{}: {message}", status_suffix(.status))]
  Remote {
    status: Option<u16>,
    message: String,
  },

  #[error("Malformed response: {0}")]
  MalformedResponse(String),

  #[error("{entity} {id} not found")]
  NotFound { entity: &'static str, id: String },

  #[error("Session expired, please log in again")]
  AuthExpired,

  /// Login rejected or the session is in the wrong state for the operation
  #[error("Authentication failed: {0}")]
  Auth(String),

  #[error("Another navigation check is in progress")]
  GuardBusy,
}

impl ClientError {
  pub fn storage(e: impl std::fmt::Display) -> Self {
    Self::Storage(e.to_string())
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Remote { status, .. } => *status,
      _ => None,
    }
  }
}

impl From<rusqlite::Error> for ClientError {
  fn from(e: rusqlite::Error) -> Self {
    Self::Storage(e.to_string())
  }
}

fn status_suffix(status: &Option<u16>) -> String {
  status.map(|s| format!(" with status {s}")).unwrap_or_default()
}
