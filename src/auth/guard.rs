//! Route protection rules for the navigation guard.

/// Routes that need an authenticated session
const PROTECTED_ROUTES: &[&str] = &[
  "/books/:isbn",
  "/admin/books",
  "/admin/users",
  "/admin/register",
  "/admin/users/edit/:id",
];

/// Outcome of a navigation guard evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
  Allowed,
  RedirectToLogin,
}

/// Set of route patterns; `:name` segments match any word segment.
#[derive(Debug, Clone)]
pub struct RouteTable {
  patterns: Vec<Vec<String>>,
}

impl RouteTable {
  pub fn new<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
    Self {
      patterns: patterns
        .into_iter()
        .map(|p| split(p).into_iter().map(String::from).collect())
        .collect(),
    }
  }

  pub fn protected() -> Self {
    Self::new(PROTECTED_ROUTES.iter().copied())
  }

  pub fn matches(&self, path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments = split(path);
    self.patterns.iter().any(|pattern| {
      pattern.len() == segments.len()
        && pattern
          .iter()
          .zip(&segments)
          .all(|(p, s)| segment_matches(p, s))
    })
  }
}

fn split(path: &str) -> Vec<&str> {
  path.split('/').filter(|s| !s.is_empty()).collect()
}

fn segment_matches(pattern: &str, segment: &str) -> bool {
  if pattern.starts_with(':') {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
  } else {
    pattern == segment
  }
}
