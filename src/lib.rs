//! Headless Jellyfin cast target that plays media in MPV.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod config;
pub mod jellyfin;
pub mod mpv;
pub mod store;
pub mod timer;

pub use config::{AppConfig, ConfigError};

use jellyfin::{
  ControlChannel, Event, HubBridge, JellyfinClient, JellyfinError, Orchestrator, SessionSettings,
};
use mpv::{default_ipc_path, MpvClient, MpvSettings, SignalSink};
use store::{CredentialCache, CredentialRecord, PositionStore};
use timer::TimerSink;

/// How long queued reports may take to reach the server on shutdown.
const REPORT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the shim until `shutdown` resolves.
///
/// Fails only when the server cannot be reached for the initial login. Everything
/// after that (lost sockets, player crashes, failed reports) is logged and
/// recovered from.
pub async fn run<F>(config: AppConfig, shutdown: F) -> Result<(), JellyfinError>
where
  F: Future<Output = ()>,
{
  let device_id = config.device_id();
  let data_dir = config.data_dir();
  log::info!(
    "Starting {} ({}) for {}",
    config.device_name,
    device_id,
    config.server_url()
  );
  log::debug!("Data directory: {}", data_dir.display());

  let client = Arc::new(JellyfinClient::new(
    &config.server_url(),
    &config.device_name,
    &device_id,
  )?);

  let credentials = CredentialCache::new(store::credentials_file(&data_dir, &device_id));
  match credentials.load() {
    Some(record) => {
      log::info!("Using cached access token for user {}", record.user_id);
      client.restore(&record.access_token, &record.user_id);
    }
    None => {
      let auth = client
        .authenticate(&config.username, &config.password)
        .await?;
      log::info!(
        "Authenticated as {} on server {}",
        auth.user.name,
        auth.server_id.as_deref().unwrap_or("unknown")
      );
      let record = CredentialRecord {
        access_token: auth.access_token,
        user_id: auth.user.id,
      };
      if let Err(e) = credentials.save(&record) {
        log::error!("Failed to save credentials: {}", e);
      }
    }
  }

  let (events, event_queue) = mpsc::unbounded_channel();

  let signal_events = events.clone();
  let signal_sink: SignalSink = Arc::new(move |generation, signal| {
    let _ = signal_events.send(Event::Player { generation, signal });
  });
  let timer_events = events.clone();
  let timer_sink: TimerSink = Arc::new(move |generation, kind| {
    let _ = timer_events.send(Event::Timer { generation, kind });
  });

  let player = MpvClient::new(
    MpvSettings {
      mpv_path: config.mpv_path(),
      extra_args: config.mpv_args.clone(),
      ipc_path: config
        .ipc_socket_path
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(default_ipc_path),
    },
    signal_sink,
  );

  let positions = PositionStore::open(store::positions_file(&data_dir, &device_id)).in_background();
  let (hub, reporter) = HubBridge::new(client.clone(), events.clone());
  let settings = SessionSettings {
    load_delay: Duration::from_millis(config.load_delay_ms),
    progress_interval: Duration::from_secs(u64::from(config.progress_interval)),
    keybinds_next: config.keybinds_next.clone(),
    keybinds_prev: config.keybinds_prev.clone(),
  };
  let orchestrator = tokio::spawn(
    Orchestrator::new(hub, player, positions, timer_sink, settings).run(event_queue),
  );

  let command_events = events.clone();
  let channel = ControlChannel::new(
    client,
    credentials,
    config.username.clone(),
    config.password.clone(),
    Box::new(move |command| {
      let _ = command_events.send(Event::Remote(command));
    }),
  );
  let connection = channel.state();
  let cancel = CancellationToken::new();
  let channel_task = channel.spawn(cancel.clone());

  shutdown.await;
  log::info!("Shutting down, control channel {}", connection.read().as_str());

  let _ = events.send(Event::Shutdown);
  if let Err(e) = orchestrator.await {
    log::error!("Orchestrator task failed: {}", e);
  }

  cancel.cancel();
  if let Err(e) = channel_task.await {
    log::error!("Control channel task failed: {}", e);
  }

  match tokio::time::timeout(REPORT_DRAIN_TIMEOUT, reporter).await {
    Ok(Ok(())) => {}
    Ok(Err(e)) => log::error!("Reporter task failed: {}", e),
    Err(_) => log::warn!("Gave up waiting for pending reports"),
  }

  log::info!("Shutdown complete");
  Ok(())
}
