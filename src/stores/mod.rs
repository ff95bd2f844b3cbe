//! Entity stores combining the API client with a [`TimedCache`].
//!
//! [`TimedCache`]: crate::cache::TimedCache

mod books;
mod shelf;
mod users;

pub use books::BookStore;
pub use shelf::ShelfStore;
pub use users::UserStore;

use std::sync::Mutex;

/// Paging position for a list endpoint.
///
/// `total` is only trustworthy right after a network fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
  pub current_page: u32,
  pub page_size: u32,
  pub total: u64,
}

impl Pagination {
  pub fn new(page_size: u32) -> Self {
    Self {
      current_page: 1,
      page_size,
      total: 0,
    }
  }

  pub fn total_pages(&self) -> u64 {
    if self.page_size == 0 {
      return 0;
    }
    self.total.div_ceil(u64::from(self.page_size))
  }
}

/// Cache scope naming one page of a paged list
fn page_scope(page: u32, size: u32) -> String {
  format!("page={page}&size={size}")
}

/// Pagination shared between a store's methods.
struct PageCursor(Mutex<Pagination>);

impl PageCursor {
  fn new(page_size: u32) -> Self {
    Self(Mutex::new(Pagination::new(page_size)))
  }

  fn get(&self) -> Pagination {
    *self.0.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn update(&self, f: impl FnOnce(&mut Pagination)) {
    f(&mut self.0.lock().unwrap_or_else(|e| e.into_inner()));
  }
}
