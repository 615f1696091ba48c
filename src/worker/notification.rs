//! Notification descriptors built from push payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

impl NotificationAction {
  fn new(action: &str, title: &str) -> Self {
    Self {
      action: action.to_string(),
      title: title.to_string(),
    }
  }
}

/// Everything the host needs to display one notification.
///
/// Payload fields the descriptor does not model (e.g. `requireInteraction`)
/// are carried through in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDescriptor {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub data: Value,
  pub actions: Vec<NotificationAction>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Default for NotificationDescriptor {
  fn default() -> Self {
    Self {
      title: "Palm Beach Pass".to_string(),
      body: "You have a new notification".to_string(),
      icon: "/manifest-icon-192.png".to_string(),
      badge: "/manifest-icon-192.png".to_string(),
      tag: "palm-beach-pass".to_string(),
      data: Value::Object(Map::new()),
      actions: vec![
        NotificationAction::new("view", "View"),
        NotificationAction::new("dismiss", "Dismiss"),
      ],
      extra: Map::new(),
    }
  }
}

impl NotificationDescriptor {
  /// Build the descriptor for a push event.
  ///
  /// A JSON object payload is merged over `template` key by key, payload
  /// fields winning. A field that does not fit its slot (`null`, wrong type)
  /// keeps the template value. Anything that is not a JSON object becomes
  /// the body as raw text with every other default kept.
  pub fn from_push(template: &Self, payload: Option<&[u8]>) -> Self {
    let Some(payload) = payload else {
      return template.clone();
    };

    match serde_json::from_slice::<Value>(payload) {
      Ok(Value::Object(fields)) => template.merged_with(fields),
      _ => Self {
        body: String::from_utf8_lossy(payload).into_owned(),
        ..template.clone()
      },
    }
  }

  fn merged_with(&self, fields: Map<String, Value>) -> Self {
    let mut merged = self.clone();
    for (key, value) in fields {
      let mut candidate = match serde_json::to_value(&merged) {
        Ok(Value::Object(map)) => map,
        _ => return merged,
      };
      candidate.insert(key.clone(), value);
      match serde_json::from_value(Value::Object(candidate)) {
        Ok(next) => merged = next,
        Err(e) => debug!(field = %key, error = %e, "Ignoring push field"),
      }
    }
    merged
  }
}

/// A click delivered back from the host for a displayed notification.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NotificationClick {
  /// Action button pressed; `None` for a click on the notification body
  pub action: Option<String>,
  pub tag: String,
  pub data: Value,
}
