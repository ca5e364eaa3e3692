//! Request, response and result types shared by storage and the controller.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// How a request was issued by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  SameOrigin,
  Cors,
  NoCors,
}

/// An outgoing resource request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
}

impl Request {
  /// A plain GET for a subresource (stylesheet, script, image).
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::NoCors,
    }
  }

  /// A top-level navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Navigate,
    }
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Identifier of a cache entry: method plus absolute URL.
///
/// The request mode is deliberately not part of the key, so a navigation
/// matches the same URL fetched as a subresource during precache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey(String);

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self(format!("{} {}", method.as_str(), url))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// SHA256 hex digest, used as a stable fixed-length storage key.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.0.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<String> for RequestKey {
  fn from(raw: String) -> Self {
    Self(raw)
  }
}

/// Visibility class of a response, following the fetch standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin, fully inspectable
  Basic,
  /// Cross-origin with CORS headers
  Cors,
  /// Cross-origin without CORS; status and body hidden
  Opaque,
  Error,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseType::Basic => "basic",
      ResponseType::Cors => "cors",
      ResponseType::Opaque => "opaque",
      ResponseType::Error => "error",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(ResponseType::Basic),
      "cors" => Some(ResponseType::Cors),
      "opaque" => Some(ResponseType::Opaque),
      "error" => Some(ResponseType::Error),
      _ => None,
    }
  }
}

/// Immutable copy of a fully-read response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
  pub redirected: bool,
}

impl ResponseSnapshot {
  /// Same-origin, non-redirected response with the given status and body.
  pub fn basic(url: &Url, status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      url: url.to_string(),
      status,
      headers: Vec::new(),
      body: body.into(),
      response_type: ResponseType::Basic,
      redirected: false,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn is_ok(&self) -> bool {
    (200..=299).contains(&self.status)
  }
}

/// A stored entry as read back from a bucket.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub key: RequestKey,
  pub response: ResponseSnapshot,
  pub cached_at: DateTime<Utc>,
}

/// Result of serving a request, including where the response came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Network unavailable, serving the designated offline document.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::OfflineFallback,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Live network response
  Network,
  /// Stored snapshot from the active generation
  Cache,
  /// Offline page substituted for a failed navigation
  OfflineFallback,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CacheSource::Network => write!(f, "network"),
      CacheSource::Cache => write!(f, "cache"),
      CacheSource::OfflineFallback => write!(f, "offline-fallback"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_key_ignores_mode() {
    let nav = Request::navigate(url("https://site.test/home.html"));
    let sub = Request::get(url("https://site.test/home.html"));
    assert_eq!(nav.key(), sub.key());
    assert_eq!(nav.key().as_str(), "GET https://site.test/home.html");
  }

  #[test]
  fn test_key_strips_fragment() {
    let a = Request::get(url("https://site.test/home.html#about"));
    let b = Request::get(url("https://site.test/home.html"));
    assert_eq!(a.key(), b.key());
  }

  #[test]
  fn test_key_includes_method() {
    let u = url("https://site.test/form");
    let get = RequestKey::new(&Method::GET, &u);
    let post = RequestKey::new(&Method::POST, &u);
    assert_ne!(get, post);
    assert_ne!(get.digest(), post.digest());
  }

  #[test]
  fn test_digest_is_stable_hex() {
    let key = RequestKey::new(&Method::GET, &url("https://site.test/"));
    let digest = key.digest();
    assert_eq!(digest.len(), 64);
    assert_eq!(digest, key.clone().digest());
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn test_snapshot_is_ok_range() {
    let u = url("https://site.test/");
    assert!(ResponseSnapshot::basic(&u, 200, "").is_ok());
    assert!(ResponseSnapshot::basic(&u, 204, "").is_ok());
    assert!(!ResponseSnapshot::basic(&u, 304, "").is_ok());
    assert!(!ResponseSnapshot::basic(&u, 404, "").is_ok());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let snap = ResponseSnapshot::basic(&url("https://site.test/"), 200, "hi")
      .with_header("Content-Type", "text/html");
    assert_eq!(snap.header("content-type"), Some("text/html"));
    assert_eq!(snap.header("etag"), None);
  }

  #[test]
  fn test_response_type_parse_matches_as_str() {
    for ty in [
      ResponseType::Basic,
      ResponseType::Cors,
      ResponseType::Opaque,
      ResponseType::Error,
    ] {
      assert_eq!(ResponseType::parse(ty.as_str()), Some(ty));
    }
    assert_eq!(ResponseType::parse("weird"), None);
  }
}
