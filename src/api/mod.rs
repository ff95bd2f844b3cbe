//! Remote data client for the book-management API.

pub mod api_types;
mod client;
#[cfg(test)]
pub mod testing;
mod transport;
mod types;

pub use client::ApiClient;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
pub use types::{Book, LoginGrant, NewUser, Role, ShelfItem, User};
