mod app;
mod cache;
mod clients;
mod config;
mod event;
mod host;
mod net;
mod worker;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "passcache")]
#[command(about = "Offline cache agent for the Palm Beach Pass web application")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/passcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// SQLite database path (default: $XDG_DATA_HOME/passcache/cache.db)
  #[arg(long, global = true)]
  database: Option<PathBuf>,

  /// Keep caches in memory only
  #[arg(long, global = true)]
  ephemeral: bool,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the manifest into the current generation
  Install,
  /// Delete stale generations and claim clients
  Activate,
  /// Delete orphaned generations carrying this agent's prefix
  Sweep,
  /// Print the current cache generation
  Version,
  /// List generations and their entries
  List,
  /// Run one request through the agent and write the body to stdout
  Fetch {
    /// Path or absolute URL
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat as a top-level navigation
    #[arg(long)]
    navigate: bool,
    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,
  },
  /// Delete one entry from the current generation
  Evict {
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
  },
  /// Dispatch one host event given as JSON
  Event { json: String },
  /// Read newline-delimited JSON events from stdin until it closes
  Run,
}

fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("passcache=info"));
  let registry = tracing_subscriber::registry().with(filter);

  match log_file {
    Some(path) => {
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

      let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
      registry
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
      Ok(Some(guard))
    }
    None => {
      registry
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
      Ok(None)
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Flushes buffered log lines on drop
  let _log_guard = init_tracing(args.log_file.as_deref())?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override database if specified on command line
  let config = if let Some(database) = args.database {
    config::Config {
      database: Some(database),
      ..config
    }
  } else {
    config
  };

  let app = app::App::new(config, args.ephemeral)?;
  match args.command {
    Command::Install => app.install().await?,
    Command::Activate => app.activate().await?,
    Command::Sweep => app.sweep()?,
    Command::Version => app.version().await?,
    Command::List => app.list()?,
    Command::Fetch {
      url,
      method,
      navigate,
      accept,
    } => app.fetch(&url, &method, navigate, accept.as_deref()).await?,
    Command::Evict { url, method } => app.evict(&url, &method)?,
    Command::Event { json } => app.event(&json).await?,
    Command::Run => app.run().await?,
  }

  Ok(())
}
