//! Core traits and types for the cache store.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::net::Response;

/// Identity of a request inside a cache generation: method plus absolute URL.
///
/// The query string is part of the identity; the fragment is not.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_string(),
      url: url.to_string(),
    }
  }

  /// Rebuild a key from columns read back out of storage.
  pub(crate) fn from_parts(method: String, url: String) -> Self {
    Self { method, url }
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// SHA256 of the identity, used as a fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A stored response snapshot.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub key: RequestKey,
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache store backends.
///
/// A store holds any number of named generations. Writing into a generation
/// that does not exist yet creates it. Overwrites are last-write-wins.
pub trait CacheStore: Send + Sync {
  /// Create the generation if it does not exist.
  fn open(&self, name: &str) -> Result<()>;

  /// Names of every generation, oldest first.
  fn names(&self) -> Result<Vec<String>>;

  /// Drop a generation and all its entries. Returns whether it existed.
  fn delete_generation(&self, name: &str) -> Result<bool>;

  /// Look up a single entry.
  fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Store or overwrite a single entry.
  fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Remove a single entry. Returns whether it existed.
  fn delete(&self, name: &str, key: &RequestKey) -> Result<bool>;

  /// Keys stored in a generation.
  fn keys(&self, name: &str) -> Result<Vec<RequestKey>>;
}
