/// Available commands and argument parsing
use clap::Subcommand;

use crate::api::Role;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// List books on a page of the catalogue
  Books {
    /// Bypass the cache
    #[arg(short, long)]
    refresh: bool,
    #[arg(short, long, default_value_t = 1)]
    page: u32,
  },
  /// Show a single book
  Book { isbn: String },
  /// Search books, e.g. `search title=dream author=cao`
  Search {
    #[arg(value_parser = parse_key_val, required = true)]
    params: Vec<(String, String)>,
  },
  /// Delete a book
  DeleteBook { isbn: String },
  /// Show your bookshelf
  Shelf {
    #[arg(short, long)]
    refresh: bool,
    /// Keep refreshing until interrupted
    #[arg(short, long)]
    watch: bool,
  },
  /// List users (admin)
  Users {
    #[arg(short, long)]
    refresh: bool,
    #[arg(short, long, default_value_t = 1)]
    page: u32,
  },
  /// Show a single user (admin)
  User { id: String },
  /// Create a user (admin); the password is read from SHELF_PASSWORD
  CreateUser {
    username: String,
    #[arg(long, value_parser = parse_role, default_value = "user")]
    role: Role,
  },
  /// Delete a user (admin)
  DeleteUser { id: String },
  /// Log in; the password is read from SHELF_PASSWORD
  Login { username: String },
  Logout,
  /// Show the logged-in user
  Whoami,
  /// Check whether a client route may be opened
  Open { route: String },
  /// Drop all cached data
  ClearCache,
}

/// Parse a `key=value` search parameter
pub fn parse_key_val(input: &str) -> Result<(String, String), String> {
  let (key, value) = input
    .split_once('=')
    .ok_or_else(|| format!("expected key=value, got `{input}`"))?;
  let key = key.trim();
  if key.is_empty() {
    return Err(format!("missing key in `{input}`"));
  }
  Ok((key.to_string(), value.trim().to_string()))
}

pub fn parse_role(input: &str) -> Result<Role, String> {
  match input.to_lowercase().as_str() {
    "admin" => Ok(Role::Admin),
    "user" => Ok(Role::User),
    other => Err(format!("unknown role `{other}`, expected admin or user")),
  }
}
