//! Handle on one named cache generation, combining storage with network fetches.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use reqwest::Method;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::traits::{CacheStore, CachedEntry, RequestKey};
use crate::net::{Request, Response, Transport};

/// A named generation inside a [`CacheStore`].
///
/// Cloning is cheap; clones share the same store.
#[derive(Clone)]
pub struct CacheGeneration {
  store: Arc<dyn CacheStore>,
  name: String,
}

impl CacheGeneration {
  /// Handle on `name` without touching the store.
  ///
  /// Reads on a generation that does not exist miss; the first write creates it.
  pub fn new(store: Arc<dyn CacheStore>, name: impl Into<String>) -> Self {
    Self {
      store,
      name: name.into(),
    }
  }

  /// Handle on `name`, creating the generation if needed.
  pub fn open(store: Arc<dyn CacheStore>, name: impl Into<String>) -> Result<Self> {
    let generation = Self::new(store, name);
    generation.store.open(&generation.name)?;
    Ok(generation)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Exact-match lookup of a request.
  pub fn lookup(&self, request: &Request) -> Result<Option<Response>> {
    Ok(self.entry(&request.key())?.map(|entry| entry.response))
  }

  /// Lookup of a plain GET for `url`.
  pub fn lookup_url(&self, url: &Url) -> Result<Option<Response>> {
    Ok(
      self
        .entry(&RequestKey::new(&Method::GET, url))?
        .map(|entry| entry.response),
    )
  }

  pub fn entry(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    self.store.get(&self.name, key)
  }

  /// Store a response for a GET request.
  pub fn put(&self, request: &Request, response: &Response) -> Result<()> {
    if request.method != Method::GET {
      return Err(eyre!(
        "Refusing to cache {} {}: only GET responses are stored",
        request.method,
        request.url
      ));
    }
    self.store.put(&self.name, &request.key(), response)
  }

  /// Store the response only when it is a 200. Returns whether it was stored.
  pub fn put_if_cacheable(&self, request: &Request, response: &Response) -> Result<bool> {
    if !response.is_cacheable() {
      debug!(url = %request.url, status = response.status, "Not caching non-200 response");
      return Ok(false);
    }
    self.put(request, response)?;
    Ok(true)
  }

  pub fn delete(&self, key: &RequestKey) -> Result<bool> {
    self.store.delete(&self.name, key)
  }

  pub fn keys(&self) -> Result<Vec<RequestKey>> {
    self.store.keys(&self.name)
  }

  /// Fetch every URL and store each 200 response.
  ///
  /// All URLs are fetched concurrently. A URL that fails (network error or
  /// non-200) does not stop the others from being stored, but the whole call
  /// reports an error naming every failed URL. Returns the number stored.
  pub async fn add_all(&self, transport: &dyn Transport, urls: &[Url]) -> Result<usize> {
    let fetches = urls.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let response = transport.fetch(request.clone()).await?;
      if !response.is_cacheable() {
        return Err(eyre!("{} answered {}", url, response.status));
      }
      self.put(&request, &response)
    });

    let mut stored = 0;
    let mut failures = Vec::new();
    for (url, result) in urls.iter().zip(join_all(fetches).await) {
      match result {
        Ok(()) => stored += 1,
        Err(e) => {
          debug!(%url, error = %e, "Failed to add to cache");
          failures.push(url.to_string());
        }
      }
    }

    if failures.is_empty() {
      Ok(stored)
    } else {
      Err(eyre!(
        "Failed to cache {} of {} URLs: {}",
        failures.len(),
        urls.len(),
        failures.join(", ")
      ))
    }
  }
}
