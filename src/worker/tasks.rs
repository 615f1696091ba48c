//! Event lifetime extension and detached background work.

use color_eyre::Result;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// Cache work started after a response has been handed back.
pub type Deferred = BoxFuture<'static, Result<()>>;

#[derive(Default)]
struct Pending {
  count: AtomicUsize,
  settled: Notify,
}

/// Counts event handlers that are still running.
///
/// Each handler holds one [`Extension`] for the duration of its work; the host
/// waits on [`KeepAlive::settled`] before it tears the agent down.
#[derive(Clone, Default)]
pub struct KeepAlive {
  pending: Arc<Pending>,
}

/// Guard keeping the agent alive until dropped.
pub struct Extension {
  pending: Arc<Pending>,
}

impl KeepAlive {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn extend(&self) -> Extension {
    self.pending.count.fetch_add(1, Ordering::SeqCst);
    Extension {
      pending: Arc::clone(&self.pending),
    }
  }

  pub fn pending(&self) -> usize {
    self.pending.count.load(Ordering::SeqCst)
  }

  /// Resolves once no extension is held.
  pub async fn settled(&self) {
    loop {
      let notified = self.pending.settled.notified();
      if self.pending() == 0 {
        return;
      }
      notified.await;
    }
  }
}

impl Drop for Extension {
  fn drop(&mut self) {
    if self.pending.count.fetch_sub(1, Ordering::SeqCst) == 1 {
      self.pending.settled.notify_waiters();
    }
  }
}

/// Detached tasks whose outcome never reaches the caller that started them.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
  handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Run `work` on its own task. Failures are logged and dropped.
  pub fn spawn<F>(&self, label: &'static str, work: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    let handle = tokio::spawn(async move {
      if let Err(e) = work.await {
        debug!(task = label, error = %e, "Background task failed");
      }
    });

    if let Ok(mut handles) = self.handles.lock() {
      handles.retain(|h| !h.is_finished());
      handles.push(handle);
    }
  }

  /// Wait for every task spawned so far, including ones spawned while waiting.
  pub async fn drain(&self) {
    loop {
      let batch: Vec<_> = match self.handles.lock() {
        Ok(mut handles) => handles.drain(..).collect(),
        Err(_) => return,
      };
      if batch.is_empty() {
        return;
      }
      for handle in batch {
        let _ = handle.await;
      }
    }
  }
}
