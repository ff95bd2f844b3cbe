//! Session state machine.
//!
//! ```text
//! Anonymous ──login──▶ Authenticating ──token──▶ Authenticated
//!     ▲                     │                        │
//!     └──────rejected───────┘                       401
//!     ▲                                              ▼
//!     └──────────────acknowledged─────────────── Expired
//! ```

use std::sync::{Mutex, MutexGuard};

use super::token::TokenStore;
use crate::api::{Role, User};
use crate::error::{ClientError, Result};
use crate::event::{Notice, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Anonymous,
  Authenticating,
  Authenticated,
  Expired,
}

struct Inner {
  state: SessionState,
  token: Option<String>,
  user: Option<User>,
}

/// The single session of a client instance.
pub struct Session {
  inner: Mutex<Inner>,
  tokens: TokenStore,
  notifier: Notifier,
}

impl Session {
  pub fn new(tokens: TokenStore, notifier: Notifier) -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: SessionState::Anonymous,
        token: None,
        user: None,
      }),
      tokens,
      notifier,
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    // Updates never panic with the lock held
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn state(&self) -> SessionState {
    self.lock().state
  }

  pub fn token(&self) -> Option<String> {
    self.lock().token.clone()
  }

  pub fn is_authenticated(&self) -> bool {
    self.state() == SessionState::Authenticated
  }

  pub fn user(&self) -> Option<User> {
    self.lock().user.clone()
  }

  pub fn is_admin(&self) -> bool {
    let inner = self.lock();
    inner.state == SessionState::Authenticated
      && inner.user.as_ref().is_some_and(|u| u.role == Role::Admin)
  }

  /// Pick up a token persisted by an earlier run.
  ///
  /// The restored session is authenticated but has no user until it is
  /// validated against the server.
  pub fn restore(&self) -> Result<Option<String>> {
    let Some(token) = self.tokens.load()? else {
      return Ok(None);
    };

    let mut inner = self.lock();
    if inner.state == SessionState::Anonymous {
      inner.state = SessionState::Authenticated;
      inner.token = Some(token.clone());
      inner.user = None;
      tracing::debug!("restored persisted session");
    }
    Ok(inner.token.clone())
  }

  /// Record the validated identity of the current session.
  pub fn set_user(&self, user: User) {
    let mut inner = self.lock();
    if inner.state == SessionState::Authenticated {
      inner.user = Some(user);
    }
  }

  pub fn begin_login(&self) -> Result<()> {
    let mut inner = self.lock();
    if inner.state == SessionState::Authenticating {
      return Err(ClientError::Auth("A login is already in progress".into()));
    }
    inner.state = SessionState::Authenticating;
    inner.token = None;
    inner.user = None;
    Ok(())
  }

  /// Finish a login with the server-issued token.
  ///
  /// The token is persisted before the session counts as authenticated; if
  /// that fails the login fails.
  pub fn complete_login(&self, token: String, user: User) -> Result<()> {
    let mut inner = self.lock();
    if inner.state != SessionState::Authenticating {
      return Err(ClientError::Auth("No login in progress".into()));
    }

    if let Err(e) = self.tokens.save(&token) {
      inner.state = SessionState::Anonymous;
      drop(inner);
      self.erase_token();
      return Err(e);
    }

    inner.state = SessionState::Authenticated;
    inner.token = Some(token);
    inner.user = Some(user);
    Ok(())
  }

  pub fn fail_login(&self) {
    let mut inner = self.lock();
    if inner.state == SessionState::Authenticating {
      inner.state = SessionState::Anonymous;
    }
    inner.token = None;
    inner.user = None;
    drop(inner);
    self.erase_token();
  }

  /// Invalidate the session after the server rejected `rejected_token`.
  ///
  /// Only the first rejection of the current token does anything; later
  /// ones, or rejections of a token that has since been replaced, are
  /// ignored. Returns whether this call expired the session.
  pub fn expire(&self, rejected_token: &str) -> bool {
    let mut inner = self.lock();
    if inner.state != SessionState::Authenticated || inner.token.as_deref() != Some(rejected_token)
    {
      return false;
    }

    inner.state = SessionState::Expired;
    inner.token = None;
    inner.user = None;
    drop(inner);

    tracing::info!("session expired, token cleared");
    self.erase_token();
    self.notifier.send(Notice::SessionExpired);
    true
  }

  /// The user has been sent back to the login entry point.
  pub fn acknowledge_expiry(&self) {
    let mut inner = self.lock();
    if inner.state == SessionState::Expired {
      inner.state = SessionState::Anonymous;
    }
  }

  pub fn logout(&self) {
    let mut inner = self.lock();
    inner.state = SessionState::Anonymous;
    inner.token = None;
    inner.user = None;
    drop(inner);
    self.erase_token();
  }

  fn erase_token(&self) {
    if let Err(e) = self.tokens.clear() {
      tracing::warn!(error = %e, "failed to erase persisted token");
    }
  }

  #[cfg(test)]
  pub fn persisted_token(&self) -> Option<String> {
    self.tokens.load().ok().flatten()
  }
}
