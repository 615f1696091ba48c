//! Request and response snapshots shared by the transport and the cache store.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::RequestKey;

/// Ordered header list with case-insensitive lookup.
///
/// Kept as plain pairs so snapshots can be serialized into the cache store
/// without going through `HeaderMap`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
  pub fn new() -> Self {
    Self(Vec::new())
  }

  /// First value for `name`, ignoring ASCII case.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Replace every value for `name` with a single value.
  pub fn insert(&mut self, name: &str, value: &str) {
    self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    self.0.push((name.to_string(), value.to_string()));
  }

  /// Add a value, keeping existing ones (multi-valued headers).
  pub fn append(&mut self, name: &str, value: &str) {
    self.0.push((name.to_string(), value.to_string()));
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
  }
}

/// Request mode as reported by the host for an intercepted request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
  /// Top-level document load
  Navigate,
  SameOrigin,
  NoCors,
  #[default]
  Cors,
}

/// An outgoing or intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      mode: RequestMode::default(),
      headers: Headers::new(),
      body: None,
    }
  }

  /// Plain subresource GET.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Top-level document load, as the host builds it for a page navigation.
  pub fn navigate(url: Url) -> Self {
    Self::get(url)
      .with_mode(RequestMode::Navigate)
      .with_header("Accept", "text/html,application/xhtml+xml")
  }

  /// POST carrying a JSON document.
  pub fn post_json(url: Url, body: Vec<u8>) -> Self {
    let mut request = Self::new(Method::POST, url).with_header("Content-Type", "application/json");
    request.body = Some(body);
    request
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Whether the requester expects an HTML document back.
  ///
  /// A missing `Accept` header counts as "not HTML".
  pub fn accepts_html(&self) -> bool {
    self
      .headers
      .get("accept")
      .map(|accept| accept.contains("text/html"))
      .unwrap_or(false)
  }

  /// Identity of this request inside a cache generation.
  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// A captured response: status, headers and the full body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: body.into(),
    }
  }

  /// 200 response with a JSON body.
  pub fn json(body: Vec<u8>) -> Self {
    Self::new(200, body).with_header("Content-Type", "application/json")
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name, value);
    self
  }

  /// Status in the 2xx range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only exact 200 responses may enter the cache.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_header_lookup_ignores_case() {
    let mut headers = Headers::new();
    headers.insert("Content-Type", "text/css");
    assert_eq!(headers.get("content-type"), Some("text/css"));

    headers.insert("CONTENT-TYPE", "text/plain");
    assert_eq!(headers.iter().count(), 1);
    assert_eq!(headers.get("Content-Type"), Some("text/plain"));
  }

  #[test]
  fn test_missing_accept_is_not_html() {
    let request = Request::get(url("https://pass.test/app.js"));
    assert!(!request.accepts_html());

    let request = request.with_header("Accept", "text/html,*/*");
    assert!(request.accepts_html());
  }

  #[test]
  fn test_navigate_request_shape() {
    let request = Request::navigate(url("https://pass.test/checkout.html"));
    assert!(request.is_navigation());
    assert_eq!(request.method, Method::GET);
    assert!(request.accepts_html());
  }

  #[test]
  fn test_only_exact_200_is_cacheable() {
    assert!(Response::new(200, "x").is_cacheable());
    assert!(!Response::new(204, "").is_cacheable());
    assert!(!Response::new(301, "").is_cacheable());
    assert!(Response::new(204, "").ok());
    assert!(!Response::new(404, "").ok());
  }
}
