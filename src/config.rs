use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::SqliteStorage;
use crate::worker::NotificationDescriptor;

/// Agent configuration.
///
/// Every field has a default, so a config file only needs the fields it
/// changes. The defaults describe the Palm Beach Pass application.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Naming prefix shared by every cache generation of this agent
  pub cache_prefix: String,
  /// Current version; the current generation is `cache_prefix + version`
  pub version: String,
  /// Origin the application is served from; relative paths resolve against it
  pub origin: String,
  /// Document served for offline navigations with no exact cache entry
  pub root_shell: String,
  /// Preferred fallback for failed HTML subresource requests
  pub offline_page: Option<String>,
  /// URLs pre-cached at install (paths or absolute URLs)
  pub manifest: Vec<String>,
  /// Endpoint polled by the `pass-updates` periodic sync
  pub update_endpoint: String,
  /// Seconds between janitor sweeps
  pub janitor_interval_secs: u64,
  /// Default notification template merged with push payloads
  pub notification: NotificationDescriptor,
  /// Notification action name -> path opened on click
  pub shortcuts: BTreeMap<String, String>,
  /// SQLite database location (default: $XDG_DATA_HOME/passcache/cache.db)
  pub database: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      cache_prefix: "palm-beach-pass-".to_string(),
      version: "v1.0.0".to_string(),
      origin: "http://localhost:8080/".to_string(),
      root_shell: "/index.html".to_string(),
      offline_page: Some("/offline.html".to_string()),
      manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
      update_endpoint: "/api/passes/check-updates".to_string(),
      janitor_interval_secs: 24 * 60 * 60,
      notification: NotificationDescriptor::default(),
      shortcuts: BTreeMap::from([
        ("passes".to_string(), "/customer-passes.html".to_string()),
        ("browse".to_string(), "/index.html".to_string()),
      ]),
      database: None,
    }
  }
}

/// Shell documents and pinned third-party assets cached at install.
const DEFAULT_MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/customer-passes.html",
  "/vendor-portal.html",
  "/qr-system.html",
  "/checkout.html",
  "/customer-account.html",
  "/manifest.json",
  "https://cdnjs.cloudflare.com/ajax/libs/react/18.2.0/umd/react.production.min.js",
  "https://cdnjs.cloudflare.com/ajax/libs/react-dom/18.2.0/umd/react-dom.production.min.js",
  "https://cdnjs.cloudflare.com/ajax/libs/babel-standalone/7.23.5/babel.min.js",
  "https://cdnjs.cloudflare.com/ajax/libs/lucide/0.263.1/umd/lucide.js",
  "https://cdnjs.cloudflare.com/ajax/libs/qrcode-generator/1.4.4/qrcode.min.js",
  "https://cdnjs.cloudflare.com/ajax/libs/tailwindcss/2.2.19/tailwind.min.css",
];

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./passcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/passcache/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("passcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("passcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Reject settings that would make the janitor or naming ambiguous.
  pub fn validate(&self) -> Result<()> {
    if self.cache_prefix.is_empty() {
      return Err(eyre!("cache_prefix must not be empty"));
    }
    if self.version.is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    if self.janitor_interval_secs == 0 {
      return Err(eyre!("janitor_interval_secs must be greater than zero"));
    }
    self.resolve(&self.root_shell)?;
    self.resolve(&self.update_endpoint)?;
    Ok(())
  }

  /// Name of the current cache generation.
  pub fn cache_name(&self) -> String {
    format!("{}{}", self.cache_prefix, self.version)
  }

  /// Resolve a path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?
      .join(path)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path, e))
  }

  /// Manifest entries resolved to absolute URLs.
  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    self.manifest.iter().map(|entry| self.resolve(entry)).collect()
  }

  pub fn janitor_interval(&self) -> Duration {
    Duration::from_secs(self.janitor_interval_secs)
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.cache_name(), "palm-beach-pass-v1.0.0");
    assert!(config.validate().is_ok());

    let urls = config.manifest_urls().unwrap();
    assert_eq!(urls[0].as_str(), "http://localhost:8080/");
    assert!(urls
      .iter()
      .any(|u| u.host_str() == Some("cdnjs.cloudflare.com")));
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
version: v2.0.0
origin: https://pass.example.com/
manifest: ["/", "/index.html"]
"#,
    )
    .unwrap();

    assert_eq!(config.cache_name(), "palm-beach-pass-v2.0.0");
    assert_eq!(config.manifest.len(), 2);
    assert_eq!(config.root_shell, "/index.html");
    assert_eq!(
      config.resolve("/api/passes/check-updates").unwrap().as_str(),
      "https://pass.example.com/api/passes/check-updates"
    );
    assert_eq!(config.notification.title, "Palm Beach Pass");
  }

  #[test]
  fn test_empty_prefix_rejected() {
    let config = Config {
      cache_prefix: String::new(),
      ..Config::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_missing_explicit_path_errors() {
    let err = Config::load(Some(Path::new("/nonexistent/passcache.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
