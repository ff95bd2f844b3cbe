//! HTTP transport seam between the API client and the network.

use futures::future::BoxFuture;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::error::{ClientError, Result};

/// A request relative to the API base URL
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
  /// Bearer token attached to the request, if any
  pub bearer: Option<String>,
  /// Whether the session token should be attached
  pub authenticated: bool,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: None,
      bearer: None,
      authenticated: true,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path)
  }

  pub fn post(path: impl Into<String>, body: Value) -> Self {
    Self {
      body: Some(body),
      ..Self::new(Method::POST, path)
    }
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::DELETE, path)
  }

  pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
    self.query.push((key.into(), value.to_string()));
    self
  }

  /// Send without the session token (login)
  pub fn anonymous(mut self) -> Self {
    self.authenticated = false;
    self
  }
}

/// Raw response: status code and body bytes
#[derive(Debug, Clone)]
pub struct ApiResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

impl ApiResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Something that can carry an [`ApiRequest`] to the server.
///
/// Only failures to get any response at all are errors here; HTTP error
/// statuses come back as ordinary responses.
pub trait Transport: Send + Sync {
  fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse>>;
}

/// reqwest-backed transport
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: &Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ClientError::Remote {
        status: None,
        message: format!("Failed to create HTTP client: {e}"),
      })?;

    // Url::join replaces the last segment unless the base ends in a slash
    let mut base_url = base_url.clone();
    if !base_url.path().ends_with('/') {
      base_url.set_path(&format!("{}/", base_url.path()));
    }

    Ok(Self { client, base_url })
  }

  fn url_for(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| ClientError::Remote {
        status: None,
        message: format!("Invalid request path {path}: {e}"),
      })
  }
}

impl Transport for HttpTransport {
  fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse>> {
    Box::pin(async move {
      let url = self.url_for(&request.path)?;
      tracing::debug!(method = %request.method, %url, "sending request");

      let mut builder = self
        .client
        .request(request.method.clone(), url)
        .query(&request.query)
        .header(ACCEPT, "application/json");

      if let Some(token) = &request.bearer {
        builder = builder.bearer_auth(token);
      }
      if let Some(body) = &request.body {
        let bytes = serde_json::to_vec(body).map_err(|e| ClientError::Remote {
          status: None,
          message: format!("Failed to encode request body: {e}"),
        })?;
        builder = builder.header(CONTENT_TYPE, "application/json").body(bytes);
      }

      let response = builder.send().await.map_err(network_error)?;
      let status = response.status().as_u16();
      let body = response.bytes().await.map_err(network_error)?.to_vec();

      tracing::debug!(status, len = body.len(), "received response");
      Ok(ApiResponse { status, body })
    })
  }
}

fn network_error(e: reqwest::Error) -> ClientError {
  ClientError::Remote {
    status: e.status().map(|s| s.as_u16()),
    message: e.to_string(),
  }
}
