//! Scripted doubles for the network and the host, plus a wired-up agent.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{CacheGeneration, CacheStore, MemoryStorage};
use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::host::Host;
use crate::net::{Request, Response, Transport};
use crate::worker::{Agent, NotificationDescriptor};

const ORIGIN: &str = "https://pass.test/";

/// Absolute URL for `path` on the test origin.
pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN)
    .and_then(|origin| origin.join(path))
    .unwrap()
}

enum Script {
  Respond(Response),
  Fail,
}

/// Transport answering from a script. Unscripted URLs answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
  scripts: Mutex<HashMap<String, Script>>,
  offline: AtomicBool,
  calls: Mutex<Vec<(Method, String)>>,
  bodies: Mutex<Vec<Option<Vec<u8>>>>,
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, path: &str, response: Response) {
    self
      .scripts
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Script::Respond(response));
  }

  /// Make requests for `path` fail as if the connection dropped.
  pub fn fail(&self, path: &str) {
    self
      .scripts
      .lock()
      .unwrap()
      .insert(url(path).to_string(), Script::Fail);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<(Method, String)> {
    self.calls.lock().unwrap().clone()
  }

  /// Body of the most recent request.
  pub fn last_body(&self) -> Option<Vec<u8>> {
    self.bodies.lock().unwrap().last().cloned().flatten()
  }
}

impl Transport for ScriptedTransport {
  fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
    Box::pin(async move {
      let target = request.url.to_string();
      self
        .calls
        .lock()
        .unwrap()
        .push((request.method.clone(), target.clone()));
      self.bodies.lock().unwrap().push(request.body.clone());

      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("Network offline: {} {}", request.method, target));
      }
      match self.scripts.lock().unwrap().get(&target) {
        Some(Script::Respond(response)) => Ok(response.clone()),
        Some(Script::Fail) => Err(eyre!("Connection refused: {}", target)),
        None => Ok(Response::new(404, "")),
      }
    })
  }
}

/// Host recording every call the agent makes.
#[derive(Default)]
pub struct RecordingHost {
  skip_waiting: AtomicUsize,
  notifications: Mutex<Vec<NotificationDescriptor>>,
  closed: Mutex<Vec<String>>,
  windows: Mutex<Vec<Url>>,
}

impl RecordingHost {
  pub fn skip_waiting_calls(&self) -> usize {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  pub fn notifications(&self) -> Vec<NotificationDescriptor> {
    self.notifications.lock().unwrap().clone()
  }

  pub fn closed(&self) -> Vec<String> {
    self.closed.lock().unwrap().clone()
  }

  pub fn windows(&self) -> Vec<Url> {
    self.windows.lock().unwrap().clone()
  }
}

impl Host for RecordingHost {
  fn skip_waiting(&self) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
      self.skip_waiting.fetch_add(1, Ordering::SeqCst);
      Ok(())
    })
  }

  fn show_notification(&self, notification: NotificationDescriptor) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
      self.notifications.lock().unwrap().push(notification);
      Ok(())
    })
  }

  fn close_notification(&self, tag: String) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
      self.closed.lock().unwrap().push(tag);
      Ok(())
    })
  }

  fn open_window(&self, url: Url) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
      self.windows.lock().unwrap().push(url);
      Ok(())
    })
  }
}

/// Agent over a memory store, a scripted network and a recording host.
pub struct Harness {
  pub agent: Agent,
  pub store: Arc<dyn CacheStore>,
  pub transport: Arc<ScriptedTransport>,
  pub host: Arc<RecordingHost>,
  pub clients: ClientRegistry,
  pub config: Config,
}

impl Harness {
  pub fn new() -> Self {
    Self::with_manifest(&[])
  }

  pub fn with_manifest(manifest: &[&str]) -> Self {
    let config = Config {
      origin: ORIGIN.to_string(),
      manifest: manifest.iter().map(|s| s.to_string()).collect(),
      ..Config::default()
    };
    let store: Arc<dyn CacheStore> = Arc::new(MemoryStorage::new());
    let transport = Arc::new(ScriptedTransport::new());
    let host = Arc::new(RecordingHost::default());
    let clients = ClientRegistry::new();

    let agent = Agent::new(
      &config,
      Arc::clone(&store),
      Arc::clone(&transport) as Arc<dyn Transport>,
      Arc::clone(&host) as Arc<dyn Host>,
      clients.clone(),
    )
    .unwrap();

    Self {
      agent,
      store,
      transport,
      host,
      clients,
      config,
    }
  }

  fn current(&self) -> CacheGeneration {
    CacheGeneration::new(Arc::clone(&self.store), self.config.cache_name())
  }

  /// Seed the current generation.
  pub fn put(&self, path: &str, response: Response) {
    self
      .current()
      .put(&Request::get(url(path)), &response)
      .unwrap();
  }

  pub fn cached_body(&self, path: &str) -> Option<Vec<u8>> {
    self
      .current()
      .lookup_url(&url(path))
      .unwrap()
      .map(|response| response.body)
  }

  /// Sorted URLs stored in the current generation.
  pub fn cached_urls(&self) -> Vec<String> {
    let mut urls: Vec<String> = self
      .current()
      .keys()
      .unwrap()
      .iter()
      .map(|key| key.url().to_string())
      .collect();
    urls.sort();
    urls
  }

  pub fn store_names(&self) -> Vec<String> {
    self.store.names().unwrap()
  }
}
