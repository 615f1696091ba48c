//! Scheduled cleanup of orphaned cache generations.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;

/// Deletes generations left behind by crashed or skipped activations.
///
/// Only generations carrying this agent's naming prefix are considered;
/// caches owned by anything else in the same store are never touched.
pub struct Janitor {
  store: Arc<dyn CacheStore>,
  prefix: String,
  current: String,
  interval: Duration,
}

impl Janitor {
  pub fn new(store: Arc<dyn CacheStore>, prefix: String, current: String, interval: Duration) -> Self {
    Self {
      store,
      prefix,
      current,
      interval,
    }
  }

  /// One cleanup pass. Returns the deleted generation names.
  ///
  /// A generation that fails to delete is logged and skipped.
  pub fn sweep(&self) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for name in self.store.names()? {
      if !name.starts_with(&self.prefix) || name == self.current {
        continue;
      }
      match self.store.delete_generation(&name) {
        Ok(_) => {
          info!(cache = %name, "Janitor deleted stale cache");
          removed.push(name);
        }
        Err(e) => warn!(cache = %name, error = %e, "Janitor failed to delete cache"),
      }
    }
    debug!(removed = removed.len(), "Janitor sweep finished");
    Ok(removed)
  }

  /// Sweep every `interval` until the returned task is aborted.
  ///
  /// The first sweep happens one full interval after start.
  pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        if let Err(e) = self.sweep() {
          warn!(error = %e, "Janitor sweep failed");
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CachedEntry, MemoryStorage, RequestKey};
  use crate::net::Response;

  fn janitor(store: Arc<dyn CacheStore>, interval: Duration) -> Janitor {
    Janitor::new(
      store,
      "palm-beach-pass-".to_string(),
      "palm-beach-pass-v1.0.0".to_string(),
      interval,
    )
  }

  #[test]
  fn test_sweep_only_touches_own_prefix() {
    let store: Arc<dyn CacheStore> = Arc::new(MemoryStorage::new());
    for name in [
      "palm-beach-pass-v0.9.0",
      "palm-beach-pass-v1.0.0",
      "vendor-assets-v3",
      "palm-beach-pass-v0.8.1",
    ] {
      store.open(name).unwrap();
    }

    let removed = janitor(Arc::clone(&store), Duration::from_secs(60))
      .sweep()
      .unwrap();

    assert_eq!(removed, vec!["palm-beach-pass-v0.9.0", "palm-beach-pass-v0.8.1"]);
    assert_eq!(
      store.names().unwrap(),
      vec!["palm-beach-pass-v1.0.0", "vendor-assets-v3"]
    );
  }

  /// Store whose deletes fail for one generation.
  struct StuckGeneration {
    inner: MemoryStorage,
    stuck: &'static str,
  }

  impl CacheStore for StuckGeneration {
    fn open(&self, name: &str) -> Result<()> {
      self.inner.open(name)
    }

    fn names(&self) -> Result<Vec<String>> {
      self.inner.names()
    }

    fn delete_generation(&self, name: &str) -> Result<bool> {
      if name == self.stuck {
        return Err(color_eyre::eyre::eyre!("database is locked"));
      }
      self.inner.delete_generation(name)
    }

    fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
      self.inner.get(name, key)
    }

    fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
      self.inner.put(name, key, response)
    }

    fn delete(&self, name: &str, key: &RequestKey) -> Result<bool> {
      self.inner.delete(name, key)
    }

    fn keys(&self, name: &str) -> Result<Vec<RequestKey>> {
      self.inner.keys(name)
    }
  }

  #[test]
  fn test_failed_delete_does_not_stop_sweep() {
    let store: Arc<dyn CacheStore> = Arc::new(StuckGeneration {
      inner: MemoryStorage::new(),
      stuck: "palm-beach-pass-v0.8.0",
    });
    for name in ["palm-beach-pass-v0.8.0", "palm-beach-pass-v0.9.0", "palm-beach-pass-v1.0.0"] {
      store.open(name).unwrap();
    }

    let removed = janitor(Arc::clone(&store), Duration::from_secs(60))
      .sweep()
      .unwrap();

    assert_eq!(removed, vec!["palm-beach-pass-v0.9.0"]);
    assert_eq!(
      store.names().unwrap(),
      vec!["palm-beach-pass-v0.8.0", "palm-beach-pass-v1.0.0"]
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_spawned_janitor_sweeps_on_interval() {
    let store: Arc<dyn CacheStore> = Arc::new(MemoryStorage::new());
    let handle = Arc::new(janitor(Arc::clone(&store), Duration::from_secs(86_400))).spawn();

    store.open("palm-beach-pass-v0.9.0").unwrap();
    tokio::time::sleep(Duration::from_secs(3_600)).await;
    assert_eq!(store.names().unwrap().len(), 1);

    tokio::time::sleep(Duration::from_secs(86_400)).await;
    assert!(store.names().unwrap().is_empty());

    handle.abort();
  }
}
