//! Install and activate handling.

use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

use crate::cache::{CacheGeneration, CacheStore};
use crate::clients::ClientRegistry;
use crate::host::Host;
use crate::net::Transport;

/// What an install pass achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  /// Manifest URLs now stored in the current generation
  pub stored: usize,
  /// Whether every manifest URL was stored
  pub complete: bool,
}

/// Result of an activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
  /// Stale generations deleted
  pub removed: Vec<String>,
  /// Foreground contexts now controlled by this agent
  pub claimed: usize,
}

pub struct LifecycleManager {
  store: Arc<dyn CacheStore>,
  transport: Arc<dyn Transport>,
  host: Arc<dyn Host>,
  clients: ClientRegistry,
  cache_name: String,
  manifest: Vec<Url>,
}

impl LifecycleManager {
  pub fn new(
    store: Arc<dyn CacheStore>,
    transport: Arc<dyn Transport>,
    host: Arc<dyn Host>,
    clients: ClientRegistry,
    cache_name: String,
    manifest: Vec<Url>,
  ) -> Self {
    Self {
      store,
      transport,
      host,
      clients,
      cache_name,
      manifest,
    }
  }

  /// Pre-warm the current generation with the manifest, then skip waiting.
  ///
  /// Population failures are logged; installation always proceeds.
  pub async fn install(&self) -> InstallReport {
    info!(cache = %self.cache_name, urls = self.manifest.len(), "Installing");

    let report = match CacheGeneration::open(Arc::clone(&self.store), self.cache_name.as_str()) {
      Ok(cache) => match cache.add_all(self.transport.as_ref(), &self.manifest).await {
        Ok(stored) => {
          info!(stored, "App shell cached");
          InstallReport {
            stored,
            complete: true,
          }
        }
        Err(e) => {
          error!(error = %e, "Failed to cache app shell");
          InstallReport {
            stored: cache.keys().map(|keys| keys.len()).unwrap_or(0),
            complete: false,
          }
        }
      },
      Err(e) => {
        error!(error = %e, "Failed to open cache");
        InstallReport {
          stored: 0,
          complete: false,
        }
      }
    };

    if let Err(e) = self.host.skip_waiting().await {
      warn!(error = %e, "Skip waiting failed");
    }

    report
  }

  /// Delete every generation except the current one and claim open contexts.
  pub async fn activate(&self) -> ActivateReport {
    info!(cache = %self.cache_name, "Activating");

    let mut removed = Vec::new();
    match self.store.names() {
      Ok(names) => {
        for name in names.into_iter().filter(|n| *n != self.cache_name) {
          match self.store.delete_generation(&name) {
            Ok(_) => {
              info!(cache = %name, "Deleted old cache");
              removed.push(name);
            }
            Err(e) => warn!(cache = %name, error = %e, "Failed to delete old cache"),
          }
        }
      }
      Err(e) => warn!(error = %e, "Failed to list caches"),
    }

    let claimed = match self.clients.claim(&self.cache_name) {
      Ok(claimed) => claimed,
      Err(e) => {
        warn!(error = %e, "Failed to claim clients");
        0
      }
    };
    info!(removed = removed.len(), claimed, "Cache cleanup complete");

    ActivateReport { removed, claimed }
  }
}
