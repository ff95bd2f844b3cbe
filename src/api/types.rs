use serde::{Deserialize, Serialize};

use super::api_types::string_or_number;
use crate::cache::Cacheable;

/// Book record as served by `/api/books`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
  pub isbn: String,
  pub title: String,
  #[serde(default)]
  pub author: Option<String>,
  #[serde(default)]
  pub translator: Option<String>,
  #[serde(default)]
  pub genre: Option<String>,
  #[serde(default)]
  pub country: Option<String>,
  #[serde(default)]
  pub era: Option<String>,
  #[serde(default)]
  pub publisher: Option<String>,
  #[serde(default)]
  pub publish_year: Option<i32>,
  #[serde(default)]
  pub page: Option<u32>,
  #[serde(default)]
  pub cover_url: Option<String>,
  #[serde(default)]
  pub description: Option<String>,
}

/// Entry on the current user's bookshelf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShelfItem {
  pub isbn: String,
  pub nums: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Admin,
  User,
}

impl std::fmt::Display for Role {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Admin => write!(f, "admin"),
      Self::User => write!(f, "user"),
    }
  }
}

/// User account; ids arrive as numbers or strings and are kept as strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  #[serde(deserialize_with = "string_or_number")]
  pub user_id: String,
  pub username: String,
  pub role: Role,
  #[serde(default, rename = "createdAt", skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
}

/// Payload for creating a user
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
  pub username: String,
  pub password: String,
  pub role: Role,
}

/// Granted by a successful login
#[derive(Debug, Clone)]
pub struct LoginGrant {
  pub token: String,
  pub user: User,
}

impl Cacheable for Book {
  type Key = String;

  fn cache_key(&self) -> String {
    self.isbn.clone()
  }

  fn entity_type() -> &'static str {
    "books"
  }
}

impl Cacheable for ShelfItem {
  type Key = String;

  fn cache_key(&self) -> String {
    self.isbn.clone()
  }

  fn entity_type() -> &'static str {
    "shelf"
  }
}

impl Cacheable for User {
  type Key = String;

  fn cache_key(&self) -> String {
    self.user_id.clone()
  }

  fn entity_type() -> &'static str {
    "users"
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn numeric_user_id_is_normalized() {
    let user: User =
      serde_json::from_value(json!({"user_id": 7, "username": "reader", "role": "user"})).unwrap();
    assert_eq!(user.user_id, "7");
    assert_eq!(user.role, Role::User);
  }

  #[test]
  fn cached_user_round_trips_through_string_id() {
    let user: User =
      serde_json::from_value(json!({"user_id": "12", "username": "root", "role": "admin"}))
        .unwrap();
    let bytes = serde_json::to_vec(&user).unwrap();
    let back: User = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(back, user);
  }

  #[test]
  fn book_optional_fields_default() {
    let book: Book =
      serde_json::from_value(json!({"isbn": "9787020002207", "title": "Dream"})).unwrap();
    assert_eq!(book.author, None);
    assert_eq!(book.cache_key(), "9787020002207");
  }
}
