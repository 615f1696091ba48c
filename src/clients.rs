//! Registry of connected foreground application contexts.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::worker::OutboundMessage;

pub type ClientId = u64;

struct ClientSlot {
  id: ClientId,
  url: String,
  /// Cache generation of the agent controlling this context
  controller: Option<String>,
  tx: mpsc::UnboundedSender<OutboundMessage>,
}

/// A connected foreground context the agent can post to.
#[derive(Clone)]
pub struct Client {
  pub id: ClientId,
  pub url: String,
  tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Client {
  pub fn post_message(&self, message: OutboundMessage) -> Result<()> {
    self
      .tx
      .send(message)
      .map_err(|_| eyre!("Client {} is no longer connected", self.id))
  }
}

/// Shared registry of foreground contexts.
///
/// Each context receives posted messages on its own channel; a context whose
/// receiver was dropped is pruned on the next enumeration.
#[derive(Clone, Default)]
pub struct ClientRegistry {
  slots: Arc<Mutex<Vec<ClientSlot>>>,
  next_id: Arc<AtomicU64>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a context loaded at `url`.
  pub fn connect(&self, url: &str) -> Result<(ClientId, mpsc::UnboundedReceiver<OutboundMessage>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

    let mut slots = self
      .slots
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    slots.push(ClientSlot {
      id,
      url: url.to_string(),
      controller: None,
      tx,
    });

    Ok((id, rx))
  }

  /// Every context that is still connected.
  pub fn match_all(&self) -> Result<Vec<Client>> {
    let mut slots = self
      .slots
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    slots.retain(|slot| !slot.tx.is_closed());

    Ok(
      slots
        .iter()
        .map(|slot| Client {
          id: slot.id,
          url: slot.url.clone(),
          tx: slot.tx.clone(),
        })
        .collect(),
    )
  }

  /// Drop a context. Its receiver sees the channel close once drained.
  pub fn disconnect(&self, id: ClientId) -> Result<bool> {
    let mut slots = self
      .slots
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = slots.len();
    slots.retain(|slot| slot.id != id);
    Ok(slots.len() != before)
  }

  /// Take control of every connected context. Returns how many were claimed.
  pub fn claim(&self, controller: &str) -> Result<usize> {
    let mut slots = self
      .slots
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    slots.retain(|slot| !slot.tx.is_closed());

    for slot in slots.iter_mut() {
      slot.controller = Some(controller.to_string());
    }
    Ok(slots.len())
  }

  /// Generation controlling the given context, if any.
  #[cfg(test)]
  pub fn controller(&self, id: ClientId) -> Option<String> {
    let slots = self.slots.lock().ok()?;
    slots
      .iter()
      .find(|slot| slot.id == id)
      .and_then(|slot| slot.controller.clone())
  }
}
