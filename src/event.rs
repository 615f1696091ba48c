use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::Config;
use crate::net::{Request, RequestMode};
use crate::worker::{Event, FetchOutcome, MessageEvent, NotificationClick, OutboundMessage};

/// Host event as written on the command line or on stdin, one JSON object each.
///
/// ```json
/// {"event": "fetch", "url": "/checkout.html", "mode": "navigate"}
/// {"event": "message", "data": {"type": "GET_VERSION"}}
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
  Install,
  Activate,
  Fetch {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    mode: RequestMode,
    #[serde(default)]
    accept: Option<String>,
  },
  Sync {
    tag: String,
  },
  PeriodicSync {
    tag: String,
  },
  Push {
    /// JSON object, or any other value used as the notification body
    #[serde(default)]
    payload: Option<Value>,
  },
  NotificationClick(NotificationClick),
  Message {
    data: Value,
  },
}

fn default_method() -> String {
  "GET".to_string()
}

/// Where the answer to a dispatched event arrives, for events that have one.
pub enum Reply {
  Fetch(oneshot::Receiver<Result<FetchOutcome>>),
  Message(oneshot::Receiver<OutboundMessage>),
}

impl HostEvent {
  pub fn parse(line: &str) -> Result<Self> {
    serde_json::from_str(line).map_err(|e| eyre!("Invalid event '{}': {}", line.trim(), e))
  }

  /// Convert into an agent event, resolving relative URLs against the origin.
  pub fn into_event(self, config: &Config) -> Result<(Event, Option<Reply>)> {
    let converted = match self {
      HostEvent::Install => (Event::Install, None),
      HostEvent::Activate => (Event::Activate, None),
      HostEvent::Fetch {
        url,
        method,
        mode,
        accept,
      } => {
        let request = build_request(config, &url, &method, mode, accept.as_deref())?;
        let (respond_to, rx) = oneshot::channel();
        (
          Event::Fetch {
            request,
            respond_to,
          },
          Some(Reply::Fetch(rx)),
        )
      }
      HostEvent::Sync { tag } => (Event::Sync { tag }, None),
      HostEvent::PeriodicSync { tag } => (Event::PeriodicSync { tag }, None),
      HostEvent::Push { payload } => {
        let payload = match payload {
          None | Some(Value::Null) => None,
          Some(Value::String(text)) => Some(text.into_bytes()),
          Some(value) => Some(
            serde_json::to_vec(&value).map_err(|e| eyre!("Failed to encode push payload: {}", e))?,
          ),
        };
        (Event::Push { payload }, None)
      }
      HostEvent::NotificationClick(click) => (Event::NotificationClick(click), None),
      HostEvent::Message { data } => {
        let (message, rx) = MessageEvent::with_reply(data);
        (Event::Message(message), Some(Reply::Message(rx)))
      }
    };
    Ok(converted)
  }
}

/// Build a request for `url` (path or absolute) as a foreground context would.
pub fn build_request(
  config: &Config,
  url: &str,
  method: &str,
  mode: RequestMode,
  accept: Option<&str>,
) -> Result<Request> {
  let url = config.resolve(url)?;
  let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

  let mut request = if mode == RequestMode::Navigate {
    Request::navigate(url)
  } else {
    Request::new(Method::GET, url).with_mode(mode)
  };
  request.method = method;
  if let Some(accept) = accept {
    request = request.with_header("Accept", accept);
  }
  Ok(request)
}

/// Event handler that produces host events from newline-delimited JSON on stdin
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<HostEvent>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn stdin reader
    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) if line.trim().is_empty() => continue,
          Ok(Some(line)) => match HostEvent::parse(&line) {
            Ok(event) => {
              if tx.send(event).is_err() {
                break;
              }
            }
            Err(e) => warn!(error = %e, "Skipping event"),
          },
          Ok(None) => {
            debug!("Event input closed");
            break;
          }
          Err(e) => {
            warn!(error = %e, "Failed to read event input");
            break;
          }
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event; `None` once input is exhausted
  pub async fn next(&mut self) -> Option<HostEvent> {
    self.rx.recv().await
  }
}
