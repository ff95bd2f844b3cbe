mod api;
mod app;
mod auth;
mod cache;
mod commands;
mod config;
mod error;
mod event;
mod stores;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shelf")]
#[command(about = "A command-line client for the book-management API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shelf/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API base URL, overriding the config file
  #[arg(long)]
  base_url: Option<String>,

  #[command(subcommand)]
  command: commands::Command,
}

/// Log to a daily file under the data directory so stdout stays clean.
///
/// The returned guard flushes the writer when dropped.
fn init_logging() -> Option<WorkerGuard> {
  let dir = dirs::data_dir()?.join("shelf").join("logs");
  std::fs::create_dir_all(&dir).ok()?;

  let appender = tracing_appender::rolling::daily(dir, "shelf.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_env("SHELF_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = init_logging();

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Override base URL if specified on command line
  if let Some(base_url) = args.base_url {
    config.api.base_url = base_url;
  }

  let mut app = app::App::new(config).await?;
  app.run(args.command).await?;

  Ok(())
}
