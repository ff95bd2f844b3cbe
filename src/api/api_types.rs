//! Serde-deserializable types matching API responses.
//!
//! The server is not consistent about envelopes (lists come both paged and
//! bare, details both wrapped and bare), so these types accept each known
//! shape and normalize it into domain types.

use serde::{Deserialize, Deserializer};

use super::types::{Book, Role, User};
use crate::cache::Page;

/// Accept an id sent either as a JSON number or a string.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Id {
    Text(String),
    Number(i64),
  }

  Ok(match Id::deserialize(deserializer)? {
    Id::Text(s) => s,
    Id::Number(n) => n.to_string(),
  })
}

// ============================================================================
// Books
// ============================================================================

/// `GET /api/books` and `GET /api/books/search`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiBookList {
  Paged { items: Vec<Book>, total: u64 },
  Bare(Vec<Book>),
}

impl From<ApiBookList> for Page<Book> {
  fn from(list: ApiBookList) -> Self {
    match list {
      ApiBookList::Paged { items, total } => Page { items, total },
      ApiBookList::Bare(items) => Page::complete(items),
    }
  }
}

/// `GET /api/books/:isbn`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiBookDetail {
  Wrapped { book: Book },
  Bare(Book),
}

impl From<ApiBookDetail> for Book {
  fn from(detail: ApiBookDetail) -> Self {
    match detail {
      ApiBookDetail::Wrapped { book } | ApiBookDetail::Bare(book) => book,
    }
  }
}

// ============================================================================
// Users
// ============================================================================

/// `GET /api/users`
#[derive(Debug, Deserialize)]
pub struct ApiUserList {
  pub users: Vec<User>,
  pub total: Option<u64>,
}

impl From<ApiUserList> for Page<User> {
  fn from(list: ApiUserList) -> Self {
    match list.total {
      Some(total) => Page {
        items: list.users,
        total,
      },
      None => Page::complete(list.users),
    }
  }
}

/// `GET /api/users/:id`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiUserDetail {
  Wrapped { user: User },
  Bare(User),
}

impl From<ApiUserDetail> for User {
  fn from(detail: ApiUserDetail) -> Self {
    match detail {
      ApiUserDetail::Wrapped { user } | ApiUserDetail::Bare(user) => user,
    }
  }
}

// ============================================================================
// Auth
// ============================================================================

/// `GET /api/validate`
#[derive(Debug, Deserialize)]
pub struct ApiIdentity {
  #[serde(deserialize_with = "string_or_number")]
  pub user_id: String,
  pub username: String,
  pub role: Role,
}

impl From<ApiIdentity> for User {
  fn from(identity: ApiIdentity) -> Self {
    User {
      user_id: identity.user_id,
      username: identity.username,
      role: identity.role,
      created_at: None,
    }
  }
}

/// `POST /api/login`
#[derive(Debug, Deserialize)]
pub struct ApiLoginResponse {
  pub token: String,
  #[serde(flatten)]
  pub identity: ApiIdentity,
}

/// Error envelope used by the server for non-2xx responses
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  pub message: Option<String>,
  pub error: Option<String>,
}

impl ApiErrorBody {
  pub fn into_message(self) -> Option<String> {
    self.message.or(self.error)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn book_list_accepts_paged_and_bare() {
    let paged: ApiBookList = serde_json::from_value(json!({
      "items": [{"isbn": "1111111111", "title": "A"}],
      "total": 42
    }))
    .unwrap();
    let page = Page::from(paged);
    assert_eq!(page.total, 42);
    assert_eq!(page.items.len(), 1);

    let bare: ApiBookList = serde_json::from_value(json!([
      {"isbn": "1111111111", "title": "A"},
      {"isbn": "2222222222", "title": "B"}
    ]))
    .unwrap();
    assert_eq!(Page::from(bare).total, 2);
  }

  #[test]
  fn book_detail_requires_a_book() {
    let wrapped: ApiBookDetail =
      serde_json::from_value(json!({"book": {"isbn": "1111111111", "title": "A"}})).unwrap();
    assert_eq!(Book::from(wrapped).title, "A");

    assert!(serde_json::from_value::<ApiBookDetail>(json!({"book": null})).is_err());
    assert!(serde_json::from_value::<ApiBookDetail>(json!({"message": "ok"})).is_err());
  }

  #[test]
  fn login_response_requires_token() {
    let ok: ApiLoginResponse = serde_json::from_value(json!({
      "token": "t0k", "user_id": 3, "username": "reader", "role": "user"
    }))
    .unwrap();
    assert_eq!(ok.token, "t0k");
    assert_eq!(ok.identity.user_id, "3");

    assert!(serde_json::from_value::<ApiLoginResponse>(json!({
      "user_id": 3, "username": "reader", "role": "user"
    }))
    .is_err());
  }

  #[test]
  fn error_body_prefers_message() {
    let body: ApiErrorBody =
      serde_json::from_value(json!({"message": "nope", "error": "bad"})).unwrap();
    assert_eq!(body.into_message().as_deref(), Some("nope"));
  }
}
