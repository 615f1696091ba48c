//! Fetch interception: strategy selection by request shape.
//!
//! - non-GET: passed through, the cache is never touched
//! - navigation: network-first, falling back to the exact entry, then the root shell
//! - other GET: stale-while-revalidate, falling back to the offline page for HTML

use color_eyre::Result;
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::tasks::Deferred;
use crate::cache::CacheGeneration;
use crate::net::{Request, Response, Transport};

/// How the agent answered a request.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
  /// Not intercepted; the host performs the request itself
  Passthrough,
  /// Answered by the agent
  Respond(Response),
}

/// Interception result plus cache work to start once the response is out.
pub struct Intercepted {
  pub outcome: FetchOutcome,
  pub deferred: Option<Deferred>,
}

impl Intercepted {
  fn passthrough() -> Self {
    Self {
      outcome: FetchOutcome::Passthrough,
      deferred: None,
    }
  }

  fn respond(response: Response) -> Self {
    Self {
      outcome: FetchOutcome::Respond(response),
      deferred: None,
    }
  }

  fn then(mut self, deferred: Deferred) -> Self {
    self.deferred = Some(deferred);
    self
  }
}

pub struct Interceptor {
  cache: CacheGeneration,
  transport: Arc<dyn Transport>,
  root_shell: Url,
  offline_page: Option<Url>,
}

impl Interceptor {
  pub fn new(
    cache: CacheGeneration,
    transport: Arc<dyn Transport>,
    root_shell: Url,
    offline_page: Option<Url>,
  ) -> Self {
    Self {
      cache,
      transport,
      root_shell,
      offline_page,
    }
  }

  /// Pick a strategy for `request` and run it.
  ///
  /// `Err` is the original network failure, returned only when no cached
  /// substitute applies.
  pub async fn intercept(&self, request: Request) -> Result<Intercepted> {
    if request.method != Method::GET {
      debug!(method = %request.method, url = %request.url, "Passing through non-GET request");
      return Ok(Intercepted::passthrough());
    }

    if request.is_navigation() {
      self.network_first(request).await
    } else {
      self.stale_while_revalidate(request).await
    }
  }

  async fn network_first(&self, request: Request) -> Result<Intercepted> {
    match self.transport.fetch(request.clone()).await {
      Ok(response) => {
        let cache = self.cache.clone();
        let snapshot = response.clone();
        let deferred: Deferred = Box::pin(async move {
          cache.put_if_cacheable(&request, &snapshot)?;
          Ok(())
        });
        Ok(Intercepted::respond(response).then(deferred))
      }
      Err(error) => {
        warn!(url = %request.url, error = %error, "Navigation failed, serving from cache");
        if let Some(cached) = self.cached(&request) {
          return Ok(Intercepted::respond(cached));
        }
        match self.cached_url(&self.root_shell) {
          Some(shell) => Ok(Intercepted::respond(shell)),
          None => Err(error),
        }
      }
    }
  }

  async fn stale_while_revalidate(&self, request: Request) -> Result<Intercepted> {
    if let Some(cached) = self.cached(&request) {
      debug!(url = %request.url, "Cache hit");
      let cache = self.cache.clone();
      let transport = Arc::clone(&self.transport);
      let deferred: Deferred = Box::pin(async move {
        let response = transport.fetch(request.clone()).await?;
        if cache.put_if_cacheable(&request, &response)? {
          debug!(url = %request.url, "Revalidated cache entry");
        }
        Ok(())
      });
      return Ok(Intercepted::respond(cached).then(deferred));
    }

    debug!(url = %request.url, "Cache miss");
    match self.transport.fetch(request.clone()).await {
      Ok(response) => {
        if let Err(e) = self.cache.put_if_cacheable(&request, &response) {
          debug!(url = %request.url, error = %e, "Failed to cache response");
        }
        Ok(Intercepted::respond(response))
      }
      Err(error) => {
        warn!(url = %request.url, error = %error, "Fetch failed");
        if request.accepts_html() {
          if let Some(fallback) = self.offline_fallback() {
            return Ok(Intercepted::respond(fallback));
          }
        }
        Err(error)
      }
    }
  }

  /// Offline page if cached, else the root shell.
  fn offline_fallback(&self) -> Option<Response> {
    self
      .offline_page
      .as_ref()
      .and_then(|page| self.cached_url(page))
      .or_else(|| self.cached_url(&self.root_shell))
  }

  fn cached(&self, request: &Request) -> Option<Response> {
    self.cache.lookup(request).unwrap_or_else(|e| {
      warn!(url = %request.url, error = %e, "Cache read failed");
      None
    })
  }

  fn cached_url(&self, url: &Url) -> Option<Response> {
    self.cache.lookup_url(url).unwrap_or_else(|e| {
      warn!(%url, error = %e, "Cache read failed");
      None
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{url, Harness};
  use serde_json::json;

  fn body(outcome: FetchOutcome) -> Vec<u8> {
    match outcome {
      FetchOutcome::Respond(response) => response.body,
      FetchOutcome::Passthrough => panic!("expected a response"),
    }
  }

  #[tokio::test]
  async fn test_non_get_passes_through_without_cache() {
    let h = Harness::new();
    h.transport.respond("/api/purchase", Response::new(200, "ok"));

    let request = Request::post_json(url("/api/purchase"), json!({"pass": 1}).to_string().into_bytes());
    let outcome = h.agent.fetch(request).await.unwrap();

    assert_eq!(outcome, FetchOutcome::Passthrough);
    assert!(h.transport.calls().is_empty());
    assert!(h.store_names().is_empty());
  }

  #[tokio::test]
  async fn test_online_navigation_is_fresh() {
    let h = Harness::new();
    h.put("/checkout.html", Response::new(200, "stale"));
    h.transport.respond("/checkout.html", Response::new(200, "fresh"));

    let outcome = h.agent.fetch(Request::navigate(url("/checkout.html"))).await.unwrap();
    h.agent.shutdown().await;

    assert_eq!(body(outcome), b"fresh".to_vec());
    assert_eq!(h.cached_body("/checkout.html"), Some(b"fresh".to_vec()));
  }

  #[tokio::test]
  async fn test_offline_navigation_uses_exact_entry() {
    let h = Harness::new();
    h.put("/vendor-portal.html", Response::new(200, "vendor"));
    h.put("/index.html", Response::new(200, "shell"));
    h.transport.set_offline(true);

    let outcome = h.agent.fetch(Request::navigate(url("/vendor-portal.html"))).await.unwrap();
    assert_eq!(body(outcome), b"vendor".to_vec());
  }

  #[tokio::test]
  async fn test_offline_navigation_falls_back_to_shell() {
    let h = Harness::new();
    h.put("/index.html", Response::new(200, "shell"));
    h.transport.set_offline(true);

    let outcome = h.agent.fetch(Request::navigate(url("/passes/42"))).await.unwrap();
    assert_eq!(body(outcome), b"shell".to_vec());
  }

  #[tokio::test]
  async fn test_offline_navigation_without_shell_fails() {
    let h = Harness::new();
    h.transport.set_offline(true);

    assert!(h.agent.fetch(Request::navigate(url("/passes/42"))).await.is_err());
  }

  #[tokio::test]
  async fn test_navigation_error_status_not_cached() {
    let h = Harness::new();
    h.transport.respond("/missing.html", Response::new(404, "not found"));

    let outcome = h.agent.fetch(Request::navigate(url("/missing.html"))).await.unwrap();
    h.agent.shutdown().await;

    assert_eq!(body(outcome), b"not found".to_vec());
    assert_eq!(h.cached_body("/missing.html"), None);
  }

  #[tokio::test]
  async fn test_cache_hit_served_then_revalidated() {
    let h = Harness::new();
    h.put("/app.css", Response::new(200, "old"));
    h.transport.respond("/app.css", Response::new(200, "new"));

    let outcome = h.agent.fetch(Request::get(url("/app.css"))).await.unwrap();
    assert_eq!(body(outcome), b"old".to_vec());

    h.agent.shutdown().await;
    assert_eq!(h.cached_body("/app.css"), Some(b"new".to_vec()));
    assert_eq!(h.transport.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_revalidation_failure_is_swallowed() {
    let h = Harness::new();
    h.put("/app.css", Response::new(200, "old"));
    h.transport.set_offline(true);

    let outcome = h.agent.fetch(Request::get(url("/app.css"))).await.unwrap();
    h.agent.shutdown().await;

    assert_eq!(body(outcome), b"old".to_vec());
    assert_eq!(h.cached_body("/app.css"), Some(b"old".to_vec()));
  }

  #[tokio::test]
  async fn test_revalidation_does_not_store_errors() {
    let h = Harness::new();
    h.put("/app.css", Response::new(200, "old"));
    h.transport.respond("/app.css", Response::new(500, "boom"));

    h.agent.fetch(Request::get(url("/app.css"))).await.unwrap();
    h.agent.shutdown().await;

    assert_eq!(h.cached_body("/app.css"), Some(b"old".to_vec()));
  }

  #[tokio::test]
  async fn test_miss_200_cached_for_offline_reuse() {
    let h = Harness::new();
    h.transport.respond("/qr.js", Response::new(200, "qr()"));

    let first = h.agent.fetch(Request::get(url("/qr.js"))).await.unwrap();
    h.transport.set_offline(true);
    let second = h.agent.fetch(Request::get(url("/qr.js"))).await.unwrap();

    assert_eq!(body(first), body(second));
  }

  #[tokio::test]
  async fn test_miss_non_200_not_cached() {
    let h = Harness::new();
    h.transport.respond("/old.js", Response::new(301, "").with_header("Location", "/new.js"));

    let outcome = h.agent.fetch(Request::get(url("/old.js"))).await.unwrap();

    assert!(matches!(outcome, FetchOutcome::Respond(ref r) if r.status == 301));
    assert_eq!(h.cached_body("/old.js"), None);
  }

  #[tokio::test]
  async fn test_query_string_is_part_of_identity() {
    let h = Harness::new();
    h.put("/search?q=a", Response::new(200, "a"));
    h.transport.set_offline(true);

    assert!(h.agent.fetch(Request::get(url("/search?q=b"))).await.is_err());
    let hit = h.agent.fetch(Request::get(url("/search?q=a"))).await.unwrap();
    assert_eq!(body(hit), b"a".to_vec());
  }

  #[tokio::test]
  async fn test_offline_html_request_gets_offline_page() {
    let h = Harness::new();
    h.put("/index.html", Response::new(200, "shell"));
    h.put("/offline.html", Response::new(200, "offline"));
    h.transport.set_offline(true);

    let request = Request::get(url("/partials/pass.html")).with_header("Accept", "text/html");
    let outcome = h.agent.fetch(request).await.unwrap();
    assert_eq!(body(outcome), b"offline".to_vec());
  }

  #[tokio::test]
  async fn test_offline_html_request_falls_back_to_shell() {
    let h = Harness::new();
    h.put("/index.html", Response::new(200, "shell"));
    h.transport.set_offline(true);

    let request = Request::get(url("/partials/pass.html")).with_header("Accept", "text/html");
    let outcome = h.agent.fetch(request).await.unwrap();
    assert_eq!(body(outcome), b"shell".to_vec());
  }

  #[tokio::test]
  async fn test_offline_html_request_without_fallbacks_fails() {
    let h = Harness::new();
    h.transport.set_offline(true);

    let request = Request::get(url("/partials/pass.html")).with_header("Accept", "text/html");
    let err = h.agent.fetch(request).await.unwrap_err();
    assert!(err.to_string().contains("offline"));
  }

  #[tokio::test]
  async fn test_offline_non_html_propagates_failure() {
    let h = Harness::new();
    h.put("/index.html", Response::new(200, "shell"));
    h.transport.set_offline(true);

    let err = h.agent.fetch(Request::get(url("/logo.png"))).await.unwrap_err();
    assert!(err.to_string().contains("offline"));

    let request = Request::get(url("/data.json")).with_header("Accept", "application/json");
    assert!(h.agent.fetch(request).await.is_err());
  }
}
