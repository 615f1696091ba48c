use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{CacheGeneration, CacheStore, MemoryStorage, RequestKey, SqliteStorage};
use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::event::{build_request, EventHandler, HostEvent, Reply};
use crate::host::ConsoleHost;
use crate::net::{HttpTransport, RequestMode, Response, Transport};
use crate::worker::{Agent, Event, FetchOutcome, OutboundMessage};

/// Host runtime: owns the store, the network and the agent it drives
pub struct App {
  config: Config,
  store: Arc<dyn CacheStore>,
  transport: Arc<dyn Transport>,
  host: Arc<ConsoleHost>,
  clients: ClientRegistry,
  agent: Arc<Agent>,
}

impl App {
  /// Build the host. `ephemeral` keeps every generation in memory.
  pub fn new(config: Config, ephemeral: bool) -> Result<Self> {
    let store: Arc<dyn CacheStore> = if ephemeral {
      info!("Using in-memory cache store");
      Arc::new(MemoryStorage::new())
    } else {
      let path = config.database_path()?;
      info!(path = %path.display(), "Opening cache store");
      Arc::new(SqliteStorage::open(&path)?)
    };

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);
    let host = Arc::new(ConsoleHost::new());
    let clients = ClientRegistry::new();

    let agent = Agent::new(
      &config,
      Arc::clone(&store),
      Arc::clone(&transport),
      host.clone(),
      clients.clone(),
    )?;

    Ok(Self {
      config,
      store,
      transport,
      host,
      clients,
      agent: Arc::new(agent),
    })
  }

  pub async fn install(&self) -> Result<()> {
    let report = self.agent.lifecycle().install().await;
    println!(
      "{}: stored {} of {} manifest URLs{}",
      self.agent.cache_name(),
      report.stored,
      self.config.manifest.len(),
      if report.complete { "" } else { " (incomplete)" }
    );
    if self.host.waiting_skipped() {
      println!("waiting skipped");
    }
    Ok(())
  }

  pub async fn activate(&self) -> Result<()> {
    let report = self.agent.lifecycle().activate().await;
    for name in &report.removed {
      println!("deleted {}", name);
    }
    println!("{} active, {} clients claimed", self.agent.cache_name(), report.claimed);
    Ok(())
  }

  pub fn sweep(&self) -> Result<()> {
    let removed = self.agent.janitor().sweep()?;
    if removed.is_empty() {
      println!("nothing to sweep");
    }
    for name in removed {
      println!("deleted {}", name);
    }
    Ok(())
  }

  /// Ask the agent for its version the way a foreground context would.
  pub async fn version(&self) -> Result<()> {
    let (event, reply) = HostEvent::Message {
      data: json!({ "type": "GET_VERSION" }),
    }
    .into_event(&self.config)?;
    self.agent.dispatch(event).await;

    if let Some(Reply::Message(rx)) = reply {
      match rx.await {
        Ok(OutboundMessage::Version { version }) => println!("{}", version),
        Ok(other) => warn!(?other, "Unexpected version reply"),
        Err(_) => return Err(eyre!("Agent did not answer the version request")),
      }
    }
    Ok(())
  }

  /// Print every generation and its entries.
  pub fn list(&self) -> Result<()> {
    for name in self.store.names()? {
      let marker = if name == self.agent.cache_name() { " (current)" } else { "" };
      println!("{}{}", name, marker);

      let generation = CacheGeneration::new(Arc::clone(&self.store), name.as_str());
      for key in generation.keys()? {
        match generation.entry(&key)? {
          Some(entry) => println!(
            "  {} {} {} bytes  {}",
            entry.response.status,
            entry.key,
            entry.response.body.len(),
            entry.cached_at.format("%Y-%m-%d %H:%M:%S")
          ),
          None => println!("  {}", key),
        }
      }
    }
    Ok(())
  }

  /// Run one request through interception and write the body to stdout.
  pub async fn fetch(&self, url: &str, method: &str, navigate: bool, accept: Option<&str>) -> Result<()> {
    let mode = if navigate {
      RequestMode::Navigate
    } else {
      RequestMode::Cors
    };
    let request = build_request(&self.config, url, method, mode, accept)?;

    let response = match self.agent.fetch(request.clone()).await? {
      FetchOutcome::Respond(response) => response,
      FetchOutcome::Passthrough => {
        debug!(url = %request.url, "Not intercepted, fetching directly");
        self.transport.fetch(request).await?
      }
    };
    info!(status = response.status, bytes = response.body.len(), "Fetched");

    write_body(&response).await?;
    self.agent.shutdown().await;
    Ok(())
  }

  /// Delete one entry from the current generation.
  pub fn evict(&self, url: &str, method: &str) -> Result<()> {
    let url = self.config.resolve(url)?;
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
    let key = RequestKey::new(&method, &url);

    let generation = CacheGeneration::new(Arc::clone(&self.store), self.agent.cache_name());
    if generation.delete(&key)? {
      println!("evicted {}", key);
    } else {
      println!("not cached: {}", key);
    }
    Ok(())
  }

  /// Dispatch a single host event given as JSON.
  pub async fn event(&self, raw: &str) -> Result<()> {
    let (event, reply) = HostEvent::parse(raw)?.into_event(&self.config)?;
    self.agent.dispatch(event).await;
    if let Some(reply) = reply {
      print_reply(reply).await;
    }
    self.agent.shutdown().await;
    Ok(())
  }

  /// Serve events from stdin until it closes.
  pub async fn run(&self) -> Result<()> {
    let origin = self.config.resolve("/")?;
    let (client_id, mut posted) = self.clients.connect(origin.as_str())?;
    info!(client = client_id, %origin, "Console client connected");

    let printer = tokio::spawn(async move {
      while let Some(message) = posted.recv().await {
        print_json(&json!({ "posted": message }));
      }
    });

    let janitor = self.agent.start_janitor();
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let runner = tokio::spawn(Arc::clone(&self.agent).run(rx));

    let mut replies = Vec::new();
    let mut events = EventHandler::new();
    while let Some(host_event) = events.next().await {
      match host_event.into_event(&self.config) {
        Ok((event, reply)) => {
          if tx.send(event).is_err() {
            break;
          }
          if let Some(reply) = reply {
            replies.push(tokio::spawn(print_reply(reply)));
          }
        }
        Err(e) => warn!(error = %e, "Dropping event"),
      }
    }

    drop(tx);
    if let Err(e) = runner.await {
      warn!(error = %e, "Event loop ended abnormally");
    }
    self.agent.shutdown().await;
    janitor.abort();

    for reply in replies {
      if let Err(e) = reply.await {
        warn!(error = %e, "Reply printer failed");
      }
    }
    // Closing the console client lets the printer drain what is queued
    self.clients.disconnect(client_id)?;
    if let Err(e) = printer.await {
      warn!(error = %e, "Message printer failed");
    }
    Ok(())
  }
}

async fn write_body(response: &Response) -> Result<()> {
  let mut stdout = tokio::io::stdout();
  stdout
    .write_all(&response.body)
    .await
    .map_err(|e| eyre!("Failed to write response body: {}", e))?;
  stdout
    .flush()
    .await
    .map_err(|e| eyre!("Failed to flush stdout: {}", e))
}

async fn print_reply(reply: Reply) {
  match reply {
    Reply::Fetch(rx) => match rx.await {
      Ok(Ok(FetchOutcome::Respond(response))) => print_json(&json!({
        "status": response.status,
        "bytes": response.body.len(),
        "content_type": response.headers.get("content-type"),
      })),
      Ok(Ok(FetchOutcome::Passthrough)) => print_json(&json!({ "passthrough": true })),
      Ok(Err(e)) => print_json(&json!({ "error": e.to_string() })),
      Err(_) => debug!("Fetch handler dropped its reply"),
    },
    Reply::Message(rx) => {
      if let Ok(message) = rx.await {
        print_json(&json!({ "reply": message }));
      }
    }
  }
}

fn print_json(value: &serde_json::Value) {
  println!("{}", value);
}
