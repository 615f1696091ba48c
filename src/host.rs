//! Host runtime boundary: lifecycle signals, notifications, windows.

use color_eyre::Result;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use url::Url;

use crate::worker::NotificationDescriptor;

/// Services the host runtime provides to the agent.
pub trait Host: Send + Sync {
  /// Let this instance replace any active one without waiting for it to drain.
  fn skip_waiting(&self) -> BoxFuture<'_, Result<()>>;

  /// Display an OS-level notification.
  fn show_notification(&self, notification: NotificationDescriptor) -> BoxFuture<'_, Result<()>>;

  /// Dismiss a displayed notification by tag.
  fn close_notification(&self, tag: String) -> BoxFuture<'_, Result<()>>;

  /// Open a new application window at `url`.
  fn open_window(&self, url: Url) -> BoxFuture<'_, Result<()>>;
}

/// Host used by the CLI: notifications and windows are printed to stdout.
#[derive(Default)]
pub struct ConsoleHost {
  skip_waiting: AtomicBool,
}

impl ConsoleHost {
  pub fn new() -> Self {
    Self::default()
  }

  /// Whether the agent asked to skip the waiting phase.
  pub fn waiting_skipped(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }
}

impl Host for ConsoleHost {
  fn skip_waiting(&self) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
      self.skip_waiting.store(true, Ordering::SeqCst);
      info!("Skip waiting requested");
      Ok(())
    })
  }

  fn show_notification(&self, notification: NotificationDescriptor) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
      info!(tag = %notification.tag, title = %notification.title, "Showing notification");
      println!(
        "notification: {}",
        serde_json::to_string(&notification).unwrap_or_else(|_| notification.title.clone())
      );
      Ok(())
    })
  }

  fn close_notification(&self, tag: String) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
      info!(%tag, "Closing notification");
      Ok(())
    })
  }

  fn open_window(&self, url: Url) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
      info!(%url, "Opening window");
      println!("open-window: {}", url);
      Ok(())
    })
  }
}
