//! Messages exchanged with foreground application contexts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// Message posted by the agent to a foreground context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
  /// Connectivity came back
  BackgroundSync { data: SyncNotice },
  /// Pass status changes reported by the update endpoint
  PassUpdates { data: Vec<Value> },
  /// Reply to `GET_VERSION`
  Version { version: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncNotice {
  pub message: String,
}

impl OutboundMessage {
  pub fn background_sync() -> Self {
    Self::BackgroundSync {
      data: SyncNotice {
        message: "Connection restored - syncing data".to_string(),
      },
    }
  }
}

/// Message posted by a foreground context to the agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
  /// Activate the waiting agent now
  SkipWaiting,
  /// Persist a pass record for offline reads
  CachePass { data: Value },
  /// Ask for the current cache generation name
  GetVersion,
  #[serde(other)]
  Unknown,
}

impl InboundMessage {
  /// Classify a raw message. Anything malformed is `Unknown`.
  pub fn parse(raw: &Value) -> Self {
    Self::deserialize(raw).unwrap_or(Self::Unknown)
  }
}

/// An inbound message with the sender's optional reply port.
#[derive(Debug)]
pub struct MessageEvent {
  pub data: Value,
  pub reply: Option<oneshot::Sender<OutboundMessage>>,
}

impl MessageEvent {
  #[cfg(test)]
  pub fn new(data: Value) -> Self {
    Self { data, reply: None }
  }

  pub fn with_reply(data: Value) -> (Self, oneshot::Receiver<OutboundMessage>) {
    let (tx, rx) = oneshot::channel();
    (
      Self {
        data,
        reply: Some(tx),
      },
      rx,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_known_kinds() {
    assert_eq!(
      InboundMessage::parse(&json!({"type": "SKIP_WAITING"})),
      InboundMessage::SkipWaiting
    );
    assert_eq!(
      InboundMessage::parse(&json!({"type": "GET_VERSION"})),
      InboundMessage::GetVersion
    );
    assert_eq!(
      InboundMessage::parse(&json!({"type": "CACHE_PASS", "data": {"id": "42"}})),
      InboundMessage::CachePass {
        data: json!({"id": "42"})
      }
    );
  }

  #[test]
  fn test_parse_unknown_and_malformed() {
    assert_eq!(
      InboundMessage::parse(&json!({"type": "REFRESH"})),
      InboundMessage::Unknown
    );
    assert_eq!(InboundMessage::parse(&json!({"kind": "x"})), InboundMessage::Unknown);
    assert_eq!(InboundMessage::parse(&json!("SKIP_WAITING")), InboundMessage::Unknown);
    assert_eq!(
      InboundMessage::parse(&json!({"type": "CACHE_PASS"})),
      InboundMessage::Unknown
    );
  }

  #[test]
  fn test_outbound_wire_shape() {
    let message = OutboundMessage::PassUpdates {
      data: vec![json!({"id": 1})],
    };
    assert_eq!(
      serde_json::to_value(&message).unwrap(),
      json!({"type": "PASS_UPDATES", "data": [{"id": 1}]})
    );
    assert_eq!(
      serde_json::to_value(OutboundMessage::background_sync()).unwrap(),
      json!({"type": "BACKGROUND_SYNC", "data": {"message": "Connection restored - syncing data"}})
    );
  }
}
