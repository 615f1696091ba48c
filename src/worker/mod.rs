//! The offline cache agent.
//!
//! The host hands every lifecycle, fetch, sync, push, click and message event
//! to [`Agent::dispatch`], which routes it to the component that owns it.
//! Components share only the cache store and the current generation name.

mod intercept;
mod janitor;
mod lifecycle;
mod messages;
mod notification;
mod relay;
mod tasks;

pub use intercept::FetchOutcome;
pub use messages::{MessageEvent, OutboundMessage};
pub use notification::{NotificationClick, NotificationDescriptor};

use intercept::Interceptor;
use janitor::Janitor;
use lifecycle::LifecycleManager;
use relay::SyncRelay;
use tasks::{BackgroundTasks, KeepAlive};

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{CacheGeneration, CacheStore};
use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::host::Host;
use crate::net::{Request, Transport};

/// Events the host delivers to the agent.
#[derive(Debug)]
pub enum Event {
  Install,
  Activate,
  Fetch {
    request: Request,
    respond_to: oneshot::Sender<Result<FetchOutcome>>,
  },
  /// One-off background sync
  Sync { tag: String },
  PeriodicSync { tag: String },
  Push { payload: Option<Vec<u8>> },
  NotificationClick(NotificationClick),
  Message(MessageEvent),
}

impl Event {
  fn kind(&self) -> &'static str {
    match self {
      Event::Install => "install",
      Event::Activate => "activate",
      Event::Fetch { .. } => "fetch",
      Event::Sync { .. } => "sync",
      Event::PeriodicSync { .. } => "periodicsync",
      Event::Push { .. } => "push",
      Event::NotificationClick(_) => "notificationclick",
      Event::Message(_) => "message",
    }
  }
}

/// Offline cache agent: lifecycle, interception, relay and janitor over one store.
pub struct Agent {
  lifecycle: LifecycleManager,
  interceptor: Interceptor,
  relay: SyncRelay,
  janitor: Arc<Janitor>,
  keep_alive: KeepAlive,
  background: BackgroundTasks,
  cache_name: String,
}

impl Agent {
  pub fn new(
    config: &Config,
    store: Arc<dyn CacheStore>,
    transport: Arc<dyn Transport>,
    host: Arc<dyn Host>,
    clients: ClientRegistry,
  ) -> Result<Self> {
    let cache_name = config.cache_name();
    let cache = CacheGeneration::new(Arc::clone(&store), cache_name.as_str());

    let lifecycle = LifecycleManager::new(
      Arc::clone(&store),
      Arc::clone(&transport),
      Arc::clone(&host),
      clients.clone(),
      cache_name.clone(),
      config.manifest_urls()?,
    );

    let offline_page = match &config.offline_page {
      Some(page) => Some(config.resolve(page)?),
      None => None,
    };
    let interceptor = Interceptor::new(
      cache.clone(),
      Arc::clone(&transport),
      config.resolve(&config.root_shell)?,
      offline_page,
    );

    let relay = SyncRelay::new(config, cache, transport, host, clients)?;

    let janitor = Arc::new(Janitor::new(
      store,
      config.cache_prefix.clone(),
      cache_name.clone(),
      config.janitor_interval(),
    ));

    Ok(Self {
      lifecycle,
      interceptor,
      relay,
      janitor,
      keep_alive: KeepAlive::new(),
      background: BackgroundTasks::new(),
      cache_name,
    })
  }

  /// Name of the current cache generation.
  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  pub fn lifecycle(&self) -> &LifecycleManager {
    &self.lifecycle
  }

  #[cfg(test)]
  pub fn relay(&self) -> &SyncRelay {
    &self.relay
  }

  pub fn janitor(&self) -> &Janitor {
    &self.janitor
  }

  /// Handle one event, holding a keep-alive extension until it settles.
  pub async fn dispatch(&self, event: Event) {
    let _extension = self.keep_alive.extend();
    self.handle(event).await;
  }

  async fn handle(&self, event: Event) {
    debug!(event = event.kind(), "Dispatching event");
    match event {
      Event::Install => {
        self.lifecycle.install().await;
      }
      Event::Activate => {
        self.lifecycle.activate().await;
      }
      Event::Fetch {
        request,
        respond_to,
      } => {
        let result = self.interceptor.intercept(request).await;
        let deferred = match result {
          Ok(intercepted) => {
            let _ = respond_to.send(Ok(intercepted.outcome));
            intercepted.deferred
          }
          Err(e) => {
            let _ = respond_to.send(Err(e));
            None
          }
        };
        // Started only after the response has been handed back
        if let Some(work) = deferred {
          self.background.spawn("cache-update", work);
        }
      }
      Event::Sync { tag } => self.relay.background_sync(&tag).await,
      Event::PeriodicSync { tag } => self.relay.periodic_sync(&tag).await,
      Event::Push { payload } => self.relay.push(payload.as_deref()).await,
      Event::NotificationClick(click) => self.relay.notification_click(click).await,
      Event::Message(message) => self.relay.message(message).await,
    }
  }

  /// Run a request through interception and wait for the answer.
  pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
    let (respond_to, response) = oneshot::channel();
    self
      .dispatch(Event::Fetch {
        request,
        respond_to,
      })
      .await;
    response
      .await
      .map_err(|_| eyre!("Fetch handler dropped without responding"))?
  }

  /// Start the recurring janitor sweep.
  pub fn start_janitor(&self) -> JoinHandle<()> {
    Arc::clone(&self.janitor).spawn()
  }

  /// Dispatch every event from `events` on its own task until the channel closes.
  pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
      // Extend before spawning so shutdown cannot miss a queued event
      let extension = self.keep_alive.extend();
      let agent = Arc::clone(&self);
      tokio::spawn(async move {
        agent.handle(event).await;
        drop(extension);
      });
    }
    debug!("Event channel closed");
  }

  /// Wait for running handlers and detached cache work to finish.
  pub async fn shutdown(&self) {
    self.keep_alive.settled().await;
    self.background.drain().await;
    info!(cache = %self.cache_name, "Agent idle");
  }
}
