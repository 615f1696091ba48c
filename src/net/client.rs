use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;

use super::types::{Headers, Request, Response};

/// Network transport consumed by the agent.
///
/// A returned `Err` means the request never produced a response (offline,
/// DNS, TLS, reset). HTTP error statuses are ordinary responses.
pub trait Transport: Send + Sync {
  fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response>>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("passcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Transport for HttpTransport {
  fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
    Box::pin(async move {
      let url = request.url.clone();
      let mut builder = self.client.request(request.method.clone(), request.url);
      for (name, value) in request.headers.iter() {
        builder = builder.header(name, value);
      }
      if let Some(body) = request.body {
        builder = builder.body(body);
      }

      let response = builder
        .send()
        .await
        .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

      let status = response.status().as_u16();
      let mut headers = Headers::new();
      for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
          headers.append(name.as_str(), value);
        }
      }

      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?;

      Ok(Response {
        status,
        headers,
        body: body.to_vec(),
      })
    })
  }
}
