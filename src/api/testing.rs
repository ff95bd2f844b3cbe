//! In-process transport for tests.

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Mutex;

use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::error::Result;

type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse> + Send + Sync>;

/// Answers every request with `handler` and records what was sent.
pub struct ScriptedTransport {
  handler: Handler,
  requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
  pub fn new(handler: impl Fn(&ApiRequest) -> Result<ApiResponse> + Send + Sync + 'static) -> Self {
    Self {
      handler: Box::new(handler),
      requests: Mutex::new(Vec::new()),
    }
  }

  pub fn json(status: u16, body: Value) -> Result<ApiResponse> {
    Ok(ApiResponse {
      status,
      body: serde_json::to_vec(&body).unwrap(),
    })
  }

  pub fn requests(&self) -> Vec<ApiRequest> {
    self.requests.lock().unwrap().clone()
  }

  /// Number of requests sent to `path`
  pub fn count(&self, path: &str) -> usize {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.path == path)
      .count()
  }
}

impl Transport for ScriptedTransport {
  fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse>> {
    Box::pin(async move {
      // Let concurrently issued requests interleave
      tokio::task::yield_now().await;
      let response = (self.handler)(&request);
      self.requests.lock().unwrap().push(request);
      response
    })
  }
}
