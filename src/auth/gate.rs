use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::guard::{Access, RouteTable};
use super::session::Session;
use crate::api::{ApiClient, User};
use crate::error::{ClientError, Result};
use crate::event::{Notice, Notifier};

/// Login, logout and navigation checks on top of the session.
pub struct AuthGate {
  api: ApiClient,
  session: Arc<Session>,
  routes: RouteTable,
  /// Held for the duration of one navigation guard evaluation
  navigation: Mutex<()>,
  notifier: Notifier,
}

impl AuthGate {
  pub fn new(api: ApiClient, session: Arc<Session>, notifier: Notifier) -> Self {
    Self {
      api,
      session,
      routes: RouteTable::protected(),
      navigation: Mutex::new(()),
      notifier,
    }
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  /// Log in with a plain-text password, which is hashed before sending.
  pub async fn login(&self, username: &str, password: &str) -> Result<User> {
    self.session.begin_login()?;

    let grant = match self.api.login(username, &hash_password(password)).await {
      Ok(grant) => grant,
      Err(e) => {
        tracing::warn!(username, error = %e, "login failed");
        self.session.fail_login();
        return Err(match e {
          ClientError::Remote {
            status: Some(400 | 401),
            message,
          } => ClientError::Auth(message),
          other => other,
        });
      }
    };

    let user = grant.user.clone();
    if let Err(e) = self.session.complete_login(grant.token, grant.user) {
      tracing::warn!(username, error = %e, "could not persist session");
      return Err(e);
    }

    tracing::info!(username, role = %user.role, "logged in");
    self
      .notifier
      .send(Notice::Success(format!("Logged in as {}", user.username)));
    Ok(user)
  }

  pub fn logout(&self) {
    self.session.logout();
    tracing::info!("logged out");
  }

  /// Resume a persisted session, dropping it only if the server rejects it.
  ///
  /// When the server cannot be reached the session stays authenticated
  /// without a known user. Returns whether a session is now active.
  pub async fn restore(&self) -> Result<bool> {
    if self.session.restore()?.is_none() {
      return Ok(false);
    }

    match self.validate().await {
      Ok(_) => Ok(true),
      Err(ClientError::AuthExpired) => {
        tracing::info!("persisted session was rejected");
        self.session.acknowledge_expiry();
        Ok(false)
      }
      Err(e) => {
        tracing::warn!(error = %e, "could not validate persisted session, keeping it");
        Ok(self.session.is_authenticated())
      }
    }
  }

  /// Ask the server who the current token belongs to.
  pub async fn validate(&self) -> Result<User> {
    let user = self.api.validate().await?;
    self.session.set_user(user.clone());
    Ok(user)
  }

  /// Decide whether navigating to `path` may proceed.
  ///
  /// Only one evaluation runs at a time; a concurrent call fails with
  /// [`ClientError::GuardBusy`] and should be retried.
  pub async fn authorize(&self, path: &str) -> Result<Access> {
    let _guard = self
      .navigation
      .try_lock()
      .map_err(|_| ClientError::GuardBusy)?;

    if !self.routes.matches(path) {
      return Ok(Access::Allowed);
    }
    if self.session.token().is_none() {
      return Ok(Access::RedirectToLogin);
    }

    match self.validate().await {
      Ok(_) if self.session.is_authenticated() => Ok(Access::Allowed),
      Ok(_) => Ok(Access::RedirectToLogin),
      Err(e) => {
        tracing::warn!(path, error = %e, "auth check failed");
        Ok(Access::RedirectToLogin)
      }
    }
  }

  /// The user has been sent to the login entry point after an expiry.
  pub fn acknowledge_expiry(&self) {
    self.session.acknowledge_expiry();
  }
}

/// Hex-encoded SHA-256 of the password, as the server expects it.
pub fn hash_password(password: &str) -> String {
  hex::encode(Sha256::digest(password.as_bytes()))
}
