//! Sync, push and cross-context message handling.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::messages::{InboundMessage, MessageEvent, OutboundMessage};
use super::notification::{NotificationClick, NotificationDescriptor};
use crate::cache::CacheGeneration;
use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::host::Host;
use crate::net::{Request, Response, Transport};

/// Sync tag fired when connectivity returns.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";
/// Periodic sync tag polling for pass updates.
pub const PASS_UPDATES_TAG: &str = "pass-updates";

pub struct SyncRelay {
  clients: ClientRegistry,
  transport: Arc<dyn Transport>,
  host: Arc<dyn Host>,
  cache: CacheGeneration,
  update_endpoint: Url,
  config: Config,
}

impl SyncRelay {
  pub fn new(
    config: &Config,
    cache: CacheGeneration,
    transport: Arc<dyn Transport>,
    host: Arc<dyn Host>,
    clients: ClientRegistry,
  ) -> Result<Self> {
    Ok(Self {
      clients,
      transport,
      host,
      cache,
      update_endpoint: config.resolve(&config.update_endpoint)?,
      config: config.clone(),
    })
  }

  /// One-off sync fired by the host after connectivity returns.
  pub async fn background_sync(&self, tag: &str) {
    if tag != BACKGROUND_SYNC_TAG {
      debug!(%tag, "Ignoring sync tag");
      return;
    }

    info!("Performing background sync");
    if let Err(e) = self.broadcast(OutboundMessage::background_sync()) {
      warn!(error = %e, "Background sync failed");
    }
  }

  /// Periodic sync: poll for pass updates and relay any to the foreground.
  pub async fn periodic_sync(&self, tag: &str) {
    if tag != PASS_UPDATES_TAG {
      debug!(%tag, "Ignoring periodic sync tag");
      return;
    }

    info!("Syncing pass updates");
    match self.check_updates().await {
      Ok(0) => debug!("No pass updates"),
      Ok(count) => info!(count, "Relayed pass updates"),
      Err(e) => warn!(error = %e, "Pass sync failed"),
    }
  }

  async fn check_updates(&self) -> Result<usize> {
    let body = json!({ "timestamp": Utc::now().timestamp_millis() });
    let request = Request::post_json(self.update_endpoint.clone(), body.to_string().into_bytes());

    let response = self.transport.fetch(request).await?;
    if !response.ok() {
      return Err(eyre!("Update check answered {}", response.status));
    }

    let updates: Vec<Value> = serde_json::from_slice(&response.body)
      .map_err(|e| eyre!("Failed to parse pass updates: {}", e))?;
    if updates.is_empty() {
      return Ok(0);
    }

    let count = updates.len();
    self.broadcast(OutboundMessage::PassUpdates { data: updates })?;
    Ok(count)
  }

  /// Post `message` to every connected context. Returns how many received it.
  fn broadcast(&self, message: OutboundMessage) -> Result<usize> {
    let mut delivered = 0;
    for client in self.clients.match_all()? {
      match client.post_message(message.clone()) {
        Ok(()) => delivered += 1,
        Err(e) => debug!(client = client.id, url = %client.url, error = %e, "Failed to post message"),
      }
    }
    Ok(delivered)
  }

  /// Show the notification for a push event.
  pub async fn push(&self, payload: Option<&[u8]>) {
    let notification = NotificationDescriptor::from_push(&self.config.notification, payload);
    info!(title = %notification.title, "Push received");

    if let Err(e) = self.host.show_notification(notification).await {
      warn!(error = %e, "Failed to show notification");
    }
  }

  /// Dismiss the clicked notification and open the window its action names.
  pub async fn notification_click(&self, click: NotificationClick) {
    info!(action = click.action.as_deref().unwrap_or(""), "Notification clicked");

    if let Err(e) = self.host.close_notification(click.tag.clone()).await {
      debug!(error = %e, "Failed to close notification");
    }

    let Some(target) = self.click_target(&click) else {
      return;
    };
    let opened = match self.config.resolve(&target) {
      Ok(url) => self.host.open_window(url).await,
      Err(e) => Err(e),
    };
    if let Err(e) = opened {
      warn!(%target, error = %e, "Failed to open window");
    }
  }

  fn click_target(&self, click: &NotificationClick) -> Option<String> {
    match click.action.as_deref()? {
      "view" => Some(
        click
          .data
          .get("url")
          .and_then(Value::as_str)
          .unwrap_or("/")
          .to_string(),
      ),
      action => self.config.shortcuts.get(action).cloned(),
    }
  }

  /// Handle a message posted by a foreground context.
  pub async fn message(&self, event: MessageEvent) {
    match InboundMessage::parse(&event.data) {
      InboundMessage::SkipWaiting => {
        if let Err(e) = self.host.skip_waiting().await {
          warn!(error = %e, "Skip waiting failed");
        }
      }
      InboundMessage::CachePass { data } => match self.cache_pass(&data) {
        Ok(url) => debug!(%url, "Cached pass data"),
        Err(e) => warn!(error = %e, "Failed to cache pass data"),
      },
      InboundMessage::GetVersion => {
        let reply = OutboundMessage::Version {
          version: self.cache.name().to_string(),
        };
        match event.reply {
          Some(port) => {
            if port.send(reply).is_err() {
              debug!("Version requester went away");
            }
          }
          None => debug!("Version requested without a reply port"),
        }
      }
      InboundMessage::Unknown => debug!(message = %event.data, "Ignoring message"),
    }
  }

  /// Store a pass record under `/pass-data/<id>` in the current generation.
  ///
  /// The id is one encoded path segment, so it can never address an entry
  /// outside `/pass-data/`.
  fn cache_pass(&self, record: &Value) -> Result<Url> {
    let id = record
      .get("id")
      .and_then(pass_id)
      .ok_or_else(|| eyre!("Pass record has no usable id"))?;
    if id.is_empty() || id == "." || id == ".." {
      return Err(eyre!("Pass id '{}' is not a valid path segment", id));
    }

    let mut url = self.config.resolve("/pass-data/")?;
    url
      .path_segments_mut()
      .map_err(|_| eyre!("Origin {} cannot hold pass data", self.config.origin))?
      .pop_if_empty()
      .push(&id);

    let body =
      serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize pass record: {}", e))?;

    self.cache.put(&Request::get(url.clone()), &Response::json(body))?;
    Ok(url)
  }
}

/// Path form of a pass id. Integral numbers drop any fraction (`1.0` -> `1`).
fn pass_id(id: &Value) -> Option<String> {
  match id {
    Value::String(id) => Some(id.clone()),
    Value::Number(n) => {
      if let Some(i) = n.as_i64() {
        Some(i.to_string())
      } else if let Some(u) = n.as_u64() {
        Some(u.to_string())
      } else {
        let f = n.as_f64()?;
        if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
          Some((f as i64).to_string())
        } else {
          Some(f.to_string())
        }
      }
    }
    _ => None,
  }
}
