use tokio::sync::mpsc;

/// User-facing notifications raised by background work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
  Success(String),
  /// Non-fatal failure, e.g. a refresh that fell back to cached data
  Error(String),
  /// The session was invalidated by the server; the user must log in again
  SessionExpired,
}

/// Sending half of the notification channel.
///
/// Sending never fails: notices sent after the receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct Notifier {
  tx: mpsc::UnboundedSender<Notice>,
}

impl Notifier {
  pub fn send(&self, notice: Notice) {
    let _ = self.tx.send(notice);
  }
}

/// Receiving half of the notification channel
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Notice>,
  rx: mpsc::UnboundedReceiver<Notice>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  pub fn notifier(&self) -> Notifier {
    Notifier {
      tx: self.tx.clone(),
    }
  }

  /// Take the next pending notice without waiting
  pub fn try_next(&mut self) -> Option<Notice> {
    self.rx.try_recv().ok()
  }

  /// Take every pending notice
  pub fn drain(&mut self) -> Vec<Notice> {
    std::iter::from_fn(|| self.try_next()).collect()
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}
