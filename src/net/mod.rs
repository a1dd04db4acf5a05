//! Network seam: request/response types and the [`Network`] trait.
//!
//! `Err` from [`Network::fetch`] always means the transport failed (server
//! unreachable, connection reset, timeout). Any HTTP status, including 5xx,
//! comes back as `Ok`.

mod http;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

pub use http::HttpNetwork;
pub use reqwest::Method;

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  /// Any subresource or script-issued request
  #[default]
  Other,
}

/// An outgoing request as seen by the proxy and the components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  pub mode: RequestMode,
  /// Bypass any HTTP cache between us and the server
  pub no_store: bool,
}

impl NetworkRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
      mode: RequestMode::Other,
      no_store: false,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A page navigation GET.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  /// A POST carrying `body` as JSON.
  pub fn post_json<T: Serialize + ?Sized>(url: Url, body: &T) -> Result<Self> {
    let body =
      serde_json::to_vec(body).map_err(|e| eyre!("Failed to serialize request body: {}", e))?;

    Ok(Self {
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      body: Some(body),
      ..Self::new(Method::POST, url)
    })
  }

  pub fn no_store(mut self) -> Self {
    self.no_store = true;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Cache identity: method plus the URL without its fragment.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    format!("{} {}", self.method, url)
  }
}

/// A response from the network, the cache, or synthesized by the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl NetworkResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Minimal 503 returned when neither network nor cache can answer.
  pub fn unavailable() -> Self {
    Self::new(503, "Offline").with_header("Content-Type", "text/plain")
  }

  /// Status in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Decode the body as JSON.
  pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Failed to parse response body: {}", e))
  }
}

/// Anything that can carry a request to the server.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: NetworkRequest) -> Result<NetworkResponse>;
}
