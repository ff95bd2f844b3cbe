use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{ApiClient, Book, HttpTransport, ShelfItem, Transport, User};
use crate::auth::{Access, AuthGate, Session, TokenStore};
use crate::cache::{CacheResult, Cacheable, SqliteStorage, StoreLocation};
use crate::commands::Command;
use crate::config::Config;
use crate::event::{EventHandler, Notice};
use crate::stores::{BookStore, Pagination, ShelfStore, UserStore};

/// Main application state
pub struct App {
  gate: AuthGate,
  books: BookStore,
  shelf: Arc<ShelfStore>,
  users: UserStore,
  /// Notifications from the stores and the session
  events: EventHandler,
}

impl App {
  pub async fn new(config: Config) -> Result<Self> {
    let transport: Arc<dyn Transport> =
      Arc::new(HttpTransport::new(&config.base_url()?, config.timeout())?);
    Self::with_transport(config, transport).await
  }

  async fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
    let events = EventHandler::new();

    let location = match (config.cache.enabled, &config.cache.path) {
      (false, _) => StoreLocation::Memory,
      (true, Some(path)) => StoreLocation::File(path.clone()),
      (true, None) => StoreLocation::File(SqliteStorage::default_path()?),
    };
    let tokens = match location {
      StoreLocation::Memory => TokenStore::memory(),
      StoreLocation::File(_) => TokenStore::File(TokenStore::default_path()?),
    };

    let storage = Arc::new(SqliteStorage::new(
      location,
      config.cache.schema_version,
      &[
        Book::entity_type(),
        ShelfItem::entity_type(),
        User::entity_type(),
      ],
    ));
    // Without the local store everything still works from the network
    if let Err(e) = storage.open().await {
      tracing::warn!(error = %e, "cache store unavailable");
    }

    let session = Arc::new(Session::new(tokens, events.notifier()));
    let api = ApiClient::new(transport, Arc::clone(&session), events.notifier());

    let books = BookStore::new(
      api.clone(),
      Arc::clone(&storage),
      Duration::from_secs(config.cache.books_ttl_secs),
      config.pagination.books_page_size,
      events.notifier(),
    );
    let shelf = Arc::new(ShelfStore::new(
      api.clone(),
      Arc::clone(&storage),
      Duration::from_secs(config.cache.shelf_ttl_secs),
      events.notifier(),
    ));
    let users = UserStore::new(
      api.clone(),
      Arc::clone(&storage),
      Duration::from_secs(config.cache.users_ttl_secs),
      config.pagination.users_page_size,
      events.notifier(),
    );
    let gate = AuthGate::new(api, session, events.notifier());

    Ok(Self {
      gate,
      books,
      shelf,
      users,
      events,
    })
  }

  /// Run one command, then report any notifications it raised.
  pub async fn run(&mut self, command: Command) -> Result<()> {
    // A failed restore just leaves the session anonymous
    if !matches!(command, Command::Login { .. } | Command::Logout) {
      if let Err(e) = self.gate.restore().await {
        tracing::warn!(error = %e, "could not restore session");
      }
    }

    let result = self.execute(command).await;
    self.handle_notices();
    result
  }

  async fn execute(&mut self, command: Command) -> Result<()> {
    match command {
      Command::Books { refresh, page } => {
        self.books.set_page(page).await;
        let result = self.books.fetch_books(refresh).await?;
        print_books(&result, &self.books.pagination());
      }
      Command::Book { isbn } => {
        let book = self.books.book(&isbn).await?;
        print_book_detail(&book);
      }
      Command::Search { params } => {
        let page = self.books.search_books(&params).await?;
        println!("{} match(es)", page.total);
        for book in &page.items {
          print_book_line(book);
        }
      }
      Command::DeleteBook { isbn } => self.books.delete_book(&isbn).await?,
      Command::Shelf { refresh, watch } => {
        let result = self.shelf.fetch_shelf(refresh).await?;
        print_shelf(&result);
        if watch {
          self.watch_shelf().await?;
        }
      }
      Command::Users { refresh, page } => {
        self.users.set_page(page).await;
        let result = self.users.fetch_users(refresh).await?;
        print_users(&result, &self.users.pagination());
      }
      Command::User { id } => {
        let user = match self.users.cached_user(&id).await {
          Some(user) => user,
          None => self.users.user(&id).await?,
        };
        print_user_line(&user);
      }
      Command::CreateUser { username, role } => {
        let password = Config::get_password()?;
        self.users.create_user(&username, &password, role).await?;
      }
      Command::DeleteUser { id } => self.users.delete_user(&id).await?,
      Command::Login { username } => {
        let password = Config::get_password()?;
        self.gate.login(&username, &password).await?;
      }
      Command::Logout => {
        self.gate.logout();
        println!("Logged out");
      }
      Command::Whoami => {
        let session = self.gate.session();
        match session.user() {
          Some(user) if session.is_admin() => {
            print_user_line(&user);
            println!("You can manage books and users");
          }
          Some(user) => print_user_line(&user),
          None => println!("Not logged in"),
        }
      }
      Command::Open { route } => match self.gate.authorize(&route).await? {
        Access::Allowed => println!("{route}: allowed"),
        Access::RedirectToLogin => println!("{route}: login required"),
      },
      Command::ClearCache => {
        self.books.clear_cache().await?;
        self.shelf.clear_cache().await?;
        self.users.clear_cache().await?;
        println!("Cache cleared");
      }
    }
    Ok(())
  }

  /// Re-print the shelf every time it goes stale, until Ctrl-C.
  async fn watch_shelf(&mut self) -> Result<()> {
    self.watch_shelf_until(tokio::signal::ctrl_c()).await
  }

  async fn watch_shelf_until<S: Future>(&mut self, shutdown: S) -> Result<()> {
    let period = self.shelf.ttl();
    let refresher = Arc::clone(&self.shelf).spawn_auto_refresh(period);
    let mut ticker = tokio::time::interval(period);
    // The first tick fires immediately and the shelf was just printed
    ticker.tick().await;

    tokio::pin!(shutdown);

    loop {
      tokio::select! {
        _ = &mut shutdown => break,
        _ = ticker.tick() => {
          self.handle_notices();
          match self.shelf.fetch_shelf(false).await {
            Ok(result) => {
              print_shelf(&result);
              if let Some(at) = self.shelf.last_updated().await {
                print_updated_at(at);
              }
            }
            Err(e) => {
              refresher.abort();
              return Err(eyre!(e));
            }
          }
        }
      }
    }

    refresher.abort();
    Ok(())
  }

  fn handle_notices(&mut self) {
    for notice in self.events.drain() {
      match notice {
        Notice::Success(message) => println!("{message}"),
        Notice::Error(message) => eprintln!("warning: {message}"),
        Notice::SessionExpired => {
          eprintln!("Your session has expired. Run `shelf login <username>` to log in again.");
          self.gate.acknowledge_expiry();
        }
      }
    }
  }
}

fn print_books(result: &CacheResult<Vec<Book>>, pagination: &Pagination) {
  for book in &result.data {
    print_book_line(book);
  }
  println!(
    "page {}/{} ({} books, from {})",
    pagination.current_page,
    pagination.total_pages().max(1),
    pagination.total,
    result.source
  );
}

fn print_book_line(book: &Book) {
  println!(
    "{:<13}  {}  {}",
    book.isbn,
    book.title,
    book.author.as_deref().unwrap_or("")
  );
}

fn print_book_detail(book: &Book) {
  println!("{}", book.title);
  println!("  ISBN:      {}", book.isbn);
  let fields = [
    ("Author", book.author.clone()),
    ("Translator", book.translator.clone()),
    ("Publisher", book.publisher.clone()),
    ("Year", book.publish_year.map(|y| y.to_string())),
    ("Pages", book.page.map(|p| p.to_string())),
    ("Genre", book.genre.clone()),
  ];
  for (label, value) in fields {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
      println!("  {:<10} {}", format!("{label}:"), value);
    }
  }
  if let Some(description) = book.description.as_deref().filter(|d| !d.is_empty()) {
    println!();
    println!("{description}");
  }
}

fn print_shelf(result: &CacheResult<Vec<ShelfItem>>) {
  for item in &result.data {
    println!("{:<13}  x{}", item.isbn, item.nums);
  }
  println!("{} title(s) on the shelf (from {})", result.data.len(), result.source);
}

fn print_updated_at(millis: i64) {
  if let Some(at) = chrono::DateTime::from_timestamp_millis(millis) {
    println!("updated {}", at.with_timezone(&chrono::Local).format("%H:%M:%S"));
  }
}

fn print_users(result: &CacheResult<Vec<User>>, pagination: &Pagination) {
  for user in &result.data {
    print_user_line(user);
  }
  println!(
    "page {}/{} ({} users, from {})",
    pagination.current_page,
    pagination.total_pages().max(1),
    pagination.total,
    result.source
  );
}

fn print_user_line(user: &User) {
  println!("{:>6}  {:<20}  {}", user.user_id, user.username, user.role);
}
