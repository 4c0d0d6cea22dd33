//! jellyfin-mpv-shim - cast Jellyfin media to MPV
//!
//! Reads a JSON config, logs in to the server and waits for remote-control
//! commands until interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Target};
use log::LevelFilter;

use jellyfin_mpv_shim::AppConfig;

#[derive(Parser)]
#[command(name = "jellyfin-mpv-shim")]
#[command(about = "Cast target that plays Jellyfin media in MPV")]
#[command(version)]
struct Cli {
  /// Config file (defaults to the per-user config directory)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Override the directory for tokens and saved positions
  #[arg(long)]
  data_dir: Option<PathBuf>,

  /// Override the MPV executable
  #[arg(long)]
  mpv_path: Option<PathBuf>,

  /// Log debug output
  #[arg(short, long)]
  verbose: bool,
}

fn init_logger(verbose: bool) {
  let level = if verbose {
    LevelFilter::Debug
  } else {
    LevelFilter::Info
  };
  Builder::new()
    .target(Target::Stdout)
    .filter_level(LevelFilter::Warn)
    .filter_module("jellyfin_mpv_shim", level)
    .parse_default_env()
    .init();
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logger(cli.verbose);

  let path = match cli.config {
    Some(path) => path,
    None => AppConfig::default_path().context("No config directory on this platform")?,
  };
  let mut config = AppConfig::load(&path)
    .with_context(|| format!("Failed to load config from {}", path.display()))?;

  if let Some(dir) = cli.data_dir {
    config.data_dir = Some(dir.to_string_lossy().into_owned());
  }
  if let Some(mpv) = cli.mpv_path {
    config.mpv_path = Some(mpv.to_string_lossy().into_owned());
  }

  jellyfin_mpv_shim::run(config, shutdown_signal())
    .await
    .context("Failed to connect to Jellyfin")?;
  Ok(())
}

async fn shutdown_signal() {
  tokio::select! {
    _ = tokio::signal::ctrl_c() => {
      log::info!("Received SIGINT, shutting down...");
    }
    _ = async {
      #[cfg(unix)]
      {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
          Ok(mut sigterm) => {
            sigterm.recv().await;
          }
          Err(e) => {
            log::warn!("Failed to listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
          }
        }
      }
      #[cfg(not(unix))]
      {
        std::future::pending::<()>().await;
      }
    } => {
      log::info!("Received SIGTERM, shutting down...");
    }
  }
}
