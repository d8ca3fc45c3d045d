//! Request identity, cached payloads, and the transport seam.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
  Patch,
  Head,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
      Method::Patch => "PATCH",
      Method::Head => "HEAD",
    }
  }
}

/// Canonical identity of an intercepted request: method + URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
  pub method: Method,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: url.into(),
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::Get, url)
  }

  /// Only GET responses are ever cached; mutating methods flow through.
  pub fn is_cacheable(&self) -> bool {
    self.method == Method::Get
  }

  /// Human-readable form, stored alongside the hash for inspection.
  pub fn description(&self) -> String {
    format!("{} {}", self.method.as_str(), self.url)
  }

  /// SHA256 hash of the canonical form, used as the fixed-length storage key.
  pub fn storage_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.description().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// What kind of resource a request is after, as known by the intercepting
/// caller. Drives the offline fallback choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
  /// Page navigation; failures resolve to the offline document.
  Navigation,
  /// Image asset; failures resolve to the placeholder icon.
  Image,
  /// Anything else.
  Other,
}

impl RequestKind {
  /// Infer from the URL path extension. Navigations cannot be inferred;
  /// only the intercepting caller knows the request mode.
  pub fn infer(url: &str) -> Self {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('.').next() {
      Some("jpg" | "jpeg" | "png" | "gif" | "svg") => RequestKind::Image,
      _ => RequestKind::Other,
    }
  }
}

/// A stored response: status, headers, and body bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl CachedResponse {
  /// Synthetic payload for data requests that fail with no cached copy.
  pub fn offline_json() -> Self {
    Self {
      status: 503,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: br#"{"error":"You are offline"}"#.to_vec(),
    }
  }
}

/// Result of routing a request through the interception layer.
///
/// Callers must be able to tell "offline, served stale" apart from "offline,
/// nothing available", so fallbacks are data rather than errors.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
  /// Live response from the network.
  Network(CachedResponse),
  /// Served from the cache, either as a hit or as a network-failure fallback.
  Cache(CachedResponse),
  /// Offline document or placeholder icon served in place of the resource.
  Fallback(CachedResponse),
  /// Synthetic "you are offline" payload for data requests with no cached copy.
  Offline(CachedResponse),
  /// Hard miss: offline, nothing cached, no fallback applies.
  Unavailable,
}

impl FetchOutcome {
  pub fn response(&self) -> Option<&CachedResponse> {
    match self {
      FetchOutcome::Network(r)
      | FetchOutcome::Cache(r)
      | FetchOutcome::Fallback(r)
      | FetchOutcome::Offline(r) => Some(r),
      FetchOutcome::Unavailable => None,
    }
  }

  pub fn is_from_network(&self) -> bool {
    matches!(self, FetchOutcome::Network(_))
  }
}

/// The network seam. Failure means the transport rejected the request
/// (connectivity loss included); there is no soft timeout.
pub trait Transport: Send + Sync {
  fn fetch(&self, key: &RequestKey) -> impl Future<Output = Result<CachedResponse>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
  fn fetch(&self, key: &RequestKey) -> impl Future<Output = Result<CachedResponse>> + Send {
    (**self).fetch(key)
  }
}

/// Transport backed by a reqwest client.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Self {
    Self {
      client: reqwest::Client::new(),
    }
  }
}

impl Default for HttpTransport {
  fn default() -> Self {
    Self::new()
  }
}

impl Transport for HttpTransport {
  fn fetch(&self, key: &RequestKey) -> impl Future<Output = Result<CachedResponse>> + Send {
    let method = match key.method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
      Method::Patch => reqwest::Method::PATCH,
      Method::Head => reqwest::Method::HEAD,
    };
    let request = self.client.request(method, key.url.as_str());
    let url = key.url.clone();

    async move {
      let response = request
        .send()
        .await
        .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();
      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?
        .to_vec();

      Ok(CachedResponse {
        status,
        headers,
        body,
      })
    }
  }
}
