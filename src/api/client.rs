use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;

use super::api_types::{
  ApiBookDetail, ApiBookList, ApiErrorBody, ApiIdentity, ApiLoginResponse, ApiUserDetail,
  ApiUserList,
};
use super::transport::{ApiRequest, ApiResponse, Transport};
use super::types::{Book, LoginGrant, NewUser, ShelfItem, User};
use crate::auth::Session;
use crate::cache::Page;
use crate::error::{ClientError, Result};
use crate::event::{Notice, Notifier};

/// Page size used by the server's search endpoint
const SEARCH_PAGE_SIZE: u32 = 20;

/// Book-management API client
///
/// Attaches the session token to authenticated requests and expires the
/// session when the server answers one of them with 401.
#[derive(Clone)]
pub struct ApiClient {
  transport: Arc<dyn Transport>,
  session: Arc<Session>,
  notifier: Notifier,
}

impl ApiClient {
  pub fn new(transport: Arc<dyn Transport>, session: Arc<Session>, notifier: Notifier) -> Self {
    Self {
      transport,
      session,
      notifier,
    }
  }

  /// List one page of books
  pub async fn list_books(&self, page: u32, size: u32) -> Result<Page<Book>> {
    let request = ApiRequest::get("/api/books")
      .query("page", page)
      .query("size", size);
    let list: ApiBookList = self.fetch("book list", request).await?;
    Ok(list.into())
  }

  /// Get a single book by ISBN
  pub async fn get_book(&self, isbn: &str) -> Result<Book> {
    let request = ApiRequest::get(format!("/api/books/{isbn}"));
    let detail: ApiBookDetail = self
      .fetch("book detail", request)
      .await
      .map_err(|e| not_found_on_404(e, "Book", isbn))?;
    Ok(detail.into())
  }

  /// Search books; `params` are passed through as query parameters
  pub async fn search_books(&self, params: &[(String, String)]) -> Result<Page<Book>> {
    let mut request = ApiRequest::get("/api/books/search");
    for (key, value) in params {
      request = request.query(key.as_str(), value);
    }
    let request = request.query("page", 1).query("size", SEARCH_PAGE_SIZE);

    let list: ApiBookList = self.fetch("search results", request).await?;
    Ok(list.into())
  }

  pub async fn delete_book(&self, isbn: &str) -> Result<()> {
    self
      .send(ApiRequest::delete(format!("/api/books/{isbn}")))
      .await
      .map_err(|e| not_found_on_404(e, "Book", isbn))?;
    Ok(())
  }

  /// The current user's bookshelf
  pub async fn list_shelf(&self) -> Result<Page<ShelfItem>> {
    let items: Vec<ShelfItem> = self.fetch("bookshelf", ApiRequest::get("/api/bookshelf")).await?;
    Ok(Page::complete(items))
  }

  pub async fn list_users(&self, page: u32, size: u32) -> Result<Page<User>> {
    let request = ApiRequest::get("/api/users")
      .query("page", page)
      .query("size", size);
    let list: ApiUserList = self.fetch("user list", request).await?;
    Ok(list.into())
  }

  pub async fn get_user(&self, user_id: &str) -> Result<User> {
    let request = ApiRequest::get(format!("/api/users/{user_id}"));
    let detail: ApiUserDetail = self
      .fetch("user detail", request)
      .await
      .map_err(|e| not_found_on_404(e, "User", user_id))?;
    Ok(detail.into())
  }

  pub async fn create_user(&self, user: &NewUser) -> Result<()> {
    let body = serde_json::to_value(user)
      .map_err(|e| ClientError::MalformedResponse(format!("Failed to encode user: {e}")))?;
    self.send(ApiRequest::post("/api/users", body)).await?;
    Ok(())
  }

  pub async fn delete_user(&self, user_id: &str) -> Result<()> {
    self
      .send(ApiRequest::delete(format!("/api/users/{user_id}")))
      .await
      .map_err(|e| not_found_on_404(e, "User", user_id))?;
    Ok(())
  }

  /// Exchange credentials for a token. `password_hash` is already hashed.
  pub async fn login(&self, username: &str, password_hash: &str) -> Result<LoginGrant> {
    let request = ApiRequest::post(
      "/api/login",
      json!({ "username": username, "password": password_hash }),
    )
    .anonymous();

    let response: ApiLoginResponse = self.fetch("login response", request).await?;
    Ok(LoginGrant {
      token: response.token,
      user: response.identity.into(),
    })
  }

  /// Check the current token and return the identity it belongs to
  pub async fn validate(&self) -> Result<User> {
    let identity: ApiIdentity = self
      .fetch("validation response", ApiRequest::get("/api/validate"))
      .await?;
    Ok(identity.into())
  }

  async fn fetch<R: DeserializeOwned>(&self, what: &str, request: ApiRequest) -> Result<R> {
    let response = self.send(request).await?;
    serde_json::from_slice(&response.body)
      .map_err(|e| ClientError::MalformedResponse(format!("Invalid {what}: {e}")))
  }

  /// Send a request, mapping error statuses into [`ClientError`]s.
  async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
    if request.authenticated {
      request.bearer = self.session.token();
    }
    let bearer = request.bearer.clone();
    let method = request.method.clone();
    let path = request.path.clone();

    let response = self.transport.send(request).await?;
    if response.is_success() {
      return Ok(response);
    }

    let status = response.status;
    let message = serde_json::from_slice::<ApiErrorBody>(&response.body)
      .ok()
      .and_then(ApiErrorBody::into_message)
      .or_else(|| {
        StatusCode::from_u16(status)
          .ok()
          .and_then(|s| s.canonical_reason())
          .map(String::from)
      })
      .unwrap_or_else(|| "Request failed".to_string());

    tracing::warn!(%method, path = %path, status, message = %message, "request failed");

    match (status, bearer) {
      (401, Some(token)) => {
        self.session.expire(&token);
        Err(ClientError::AuthExpired)
      }
      (403, _) => {
        self
          .notifier
          .send(Notice::Error("Permission denied".to_string()));
        Err(ClientError::Remote {
          status: Some(status),
          message,
        })
      }
      _ => Err(ClientError::Remote {
        status: Some(status),
        message,
      }),
    }
  }
}

fn not_found_on_404(e: ClientError, entity: &'static str, id: &str) -> ClientError {
  match e.status() {
    Some(404) => ClientError::NotFound {
      entity,
      id: id.to_string(),
    },
    _ => e,
  }
}
