//! WebSocket control channel for Jellyfin remote control.
//!
//! One task owns the socket for the whole process lifetime. While connected it
//! forwards remote commands and sends a keepalive every 30 seconds. When the socket
//! drops it pings the server on a backoff schedule and reconnects, re-authenticating
//! first if the server rejected the token.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::client::JellyfinClient;
use super::error::JellyfinError;
use super::types::*;
use crate::store::{CredentialCache, CredentialRecord};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const PING_TIMEOUT: Duration = Duration::from_secs(3);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Playstate sub-commands the shim acts on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaystateCommand {
  Stop,
  Pause,
  Unpause,
  PlayPause,
  /// Absolute position in ticks.
  Seek(i64),
  NextTrack,
  PreviousTrack,
}

/// Commands that can be received from Jellyfin.
#[derive(Debug, Clone, PartialEq)]
pub enum HubCommand {
  /// Play media items.
  Play(PlayRequest),
  /// Playstate command (pause, unpause, seek, stop).
  Playstate(PlaystateCommand),
}

/// Classify one inbound socket message.
///
/// Keepalives, unknown message types and anything that fails to parse map to `None`.
pub fn parse_hub_message(text: &str) -> Option<HubCommand> {
  let msg: WsMessage = match serde_json::from_str(text) {
    Ok(msg) => msg,
    Err(e) => {
      log::debug!("Ignoring unparsable WebSocket message: {}", e);
      return None;
    }
  };

  match msg.message_type.as_str() {
    "Play" => {
      let request: PlayRequest = serde_json::from_value(msg.data?).ok()?;
      log::info!("Received Play command: {:?}", request);
      Some(HubCommand::Play(request))
    }
    "Playstate" => {
      let request: PlaystateRequest = serde_json::from_value(msg.data?).ok()?;
      log::info!("Received Playstate command: {:?}", request);
      let command = match request.command.as_str() {
        "Stop" => PlaystateCommand::Stop,
        "Pause" => PlaystateCommand::Pause,
        "Unpause" => PlaystateCommand::Unpause,
        "PlayPause" => PlaystateCommand::PlayPause,
        "Seek" => PlaystateCommand::Seek(request.seek_position_ticks?),
        "NextTrack" => PlaystateCommand::NextTrack,
        "PreviousTrack" => PlaystateCommand::PreviousTrack,
        other => {
          log::debug!("Unhandled Playstate command: {}", other);
          return None;
        }
      };
      Some(HubCommand::Playstate(command))
    }
    "ForceKeepAlive" | "KeepAlive" => None,
    other => {
      log::debug!("Unhandled WebSocket message type: {}", other);
      None
    }
  }
}

/// Control channel connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Disconnected,
  Connecting,
  Connected,
}

impl ConnectionState {
  pub fn as_str(&self) -> &'static str {
    match self {
      ConnectionState::Disconnected => "disconnected",
      ConnectionState::Connecting => "connecting",
      ConnectionState::Connected => "connected",
    }
  }
}

impl fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Reconnect attempt counter with capped exponential delays.
///
/// The first attempt waits 5s; attempt `n >= 2` waits `min(30, 5 * 2^(n-2))` seconds,
/// giving 5, 5, 10, 20, 30, 30, ...
#[derive(Debug, Clone, Default)]
pub struct Backoff {
  attempt: u32,
}

impl Backoff {
  const BASE_SECS: u64 = 5;
  const MAX_SECS: u64 = 30;

  /// Delay before reconnect attempt `attempt` (1-based).
  pub fn delay_for(attempt: u32) -> Duration {
    if attempt <= 1 {
      return Duration::from_secs(Self::BASE_SECS);
    }
    let factor = 1u64 << (attempt - 2).min(16);
    Duration::from_secs((Self::BASE_SECS * factor).min(Self::MAX_SECS))
  }

  pub fn attempt(&self) -> u32 {
    self.attempt
  }

  /// Delay of the current cycle. Enters attempt 1 if no cycle is running yet.
  pub fn delay(&mut self) -> Duration {
    if self.attempt == 0 {
      self.attempt = 1;
    }
    Self::delay_for(self.attempt)
  }

  /// Move to the next, longer, cycle.
  pub fn escalate(&mut self) {
    self.attempt = self.attempt.saturating_add(1);
  }

  /// Connected again.
  pub fn reset(&mut self) {
    self.attempt = 0;
  }
}

/// Receives remote commands as they arrive.
pub type CommandSink = Box<dyn Fn(HubCommand) + Send + Sync>;

/// How a connected session of the socket ended.
enum Closed {
  Cancelled,
  Lost,
}

/// Persistent WebSocket connection to the Jellyfin server.
pub struct ControlChannel {
  client: Arc<JellyfinClient>,
  credentials: CredentialCache,
  username: String,
  password: String,
  on_command: CommandSink,
  state: Arc<RwLock<ConnectionState>>,
  backoff: Backoff,
  keepalive: Duration,
}

impl ControlChannel {
  pub fn new(
    client: Arc<JellyfinClient>,
    credentials: CredentialCache,
    username: String,
    password: String,
    on_command: CommandSink,
  ) -> Self {
    Self {
      client,
      credentials,
      username,
      password,
      on_command,
      state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
      backoff: Backoff::default(),
      keepalive: KEEPALIVE_INTERVAL,
    }
  }

  /// Shared view of the connection state.
  pub fn state(&self) -> Arc<RwLock<ConnectionState>> {
    self.state.clone()
  }

  /// Run the channel until `cancel` fires.
  pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(self.run(cancel))
  }

  async fn run(mut self, cancel: CancellationToken) {
    let mut socket = match self.open().await {
      Ok(ws) => Some(ws),
      Err(e) => {
        log::warn!("Initial WebSocket connection failed: {}", e);
        None
      }
    };

    loop {
      let ws = match socket.take() {
        Some(ws) => ws,
        None => match self.reconnect(&cancel).await {
          Some(ws) => ws,
          None => break,
        },
      };

      match self.serve(ws, &cancel).await {
        Closed::Cancelled => break,
        Closed::Lost => self.set_state(ConnectionState::Disconnected),
      }
    }

    self.set_state(ConnectionState::Disconnected);
    log::info!("Control channel stopped");
  }

  fn set_state(&self, state: ConnectionState) {
    let mut current = self.state.write();
    if *current != state {
      log::debug!("Control channel: {} -> {}", *current, state);
      *current = state;
    }
  }

  /// Connect the socket and register the session.
  async fn open(&mut self) -> Result<WsStream, JellyfinError> {
    self.set_state(ConnectionState::Connecting);

    let result = async {
      let url = self.client.websocket_url()?;
      let (mut ws, _) = connect_async(url.as_str()).await?;

      let session_start = serde_json::json!({
        "MessageType": "SessionsStart",
        "Data": "0,1500"
      });
      ws.send(Message::Text(session_start.to_string().into())).await?;
      Ok::<_, JellyfinError>(ws)
    }
    .await;

    match result {
      Ok(ws) => {
        log::info!("WebSocket connected");
        self.backoff.reset();
        self.set_state(ConnectionState::Connected);
        self.announce();
        Ok(ws)
      }
      Err(e) => {
        self.set_state(ConnectionState::Disconnected);
        Err(e)
      }
    }
  }

  /// Post capabilities in the background.
  fn announce(&self) {
    let client = self.client.clone();
    tokio::spawn(async move {
      if let Err(e) = client.report_capabilities().await {
        log::warn!("Failed to report capabilities: {}", e);
      }
    });
  }

  /// Read commands and send keepalives until the socket drops or we are cancelled.
  async fn serve(&self, ws: WsStream, cancel: &CancellationToken) -> Closed {
    let (mut write, mut read) = ws.split();
    let mut keepalive =
      tokio::time::interval_at(tokio::time::Instant::now() + self.keepalive, self.keepalive);

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          log::info!("WebSocket shutdown requested via cancellation");
          let _ = tokio::time::timeout(CLOSE_TIMEOUT, write.close()).await;
          return Closed::Cancelled;
        }
        msg = read.next() => {
          match msg {
            Some(Ok(Message::Text(text))) => {
              if let Some(command) = parse_hub_message(&text) {
                (self.on_command)(command);
              }
            }
            Some(Ok(Message::Close(_))) => {
              log::info!("WebSocket closed by server");
              return Closed::Lost;
            }
            Some(Err(e)) => {
              log::error!("WebSocket error: {}", e);
              return Closed::Lost;
            }
            None => {
              log::info!("WebSocket stream ended");
              return Closed::Lost;
            }
            _ => {}
          }
        }
        _ = keepalive.tick() => {
          let keepalive = serde_json::json!({ "MessageType": "KeepAlive" });
          if let Err(e) = write.send(Message::Text(keepalive.to_string().into())).await {
            log::error!("Failed to send keepalive: {}", e);
            return Closed::Lost;
          }
          self.announce();
        }
      }
    }
  }

  /// Wait out backoff cycles until a socket is open again. `None` means cancelled.
  async fn reconnect(&mut self, cancel: &CancellationToken) -> Option<WsStream> {
    loop {
      let delay = self.backoff.delay();
      log::info!(
        "Reconnecting in {}s (attempt {})",
        delay.as_secs(),
        self.backoff.attempt()
      );

      tokio::select! {
        _ = cancel.cancelled() => return None,
        _ = tokio::time::sleep(delay) => {}
      }

      if let Some(ws) = self.recover().await {
        return Some(ws);
      }
    }
  }

  /// One reconnect attempt: ping, re-authenticate if the token was rejected, open.
  ///
  /// An unreachable server moves the backoff to the next cycle. A failed re-auth or
  /// socket open stays in the current one.
  async fn recover(&mut self) -> Option<WsStream> {
    match self.client.ping(PING_TIMEOUT).await {
      Ok(()) => {
        log::info!("Server reachable, reopening WebSocket");
      }
      Err(e) if e.is_unauthorized() => {
        log::warn!("Access token rejected, re-authenticating");
        if let Err(e) = self.reauthenticate().await {
          log::error!("Re-authentication failed: {}", e);
          return None;
        }
      }
      Err(e) => {
        log::warn!("Server unreachable: {}", e);
        self.backoff.escalate();
        return None;
      }
    }

    match self.open().await {
      Ok(ws) => Some(ws),
      Err(e) => {
        log::warn!("WebSocket reconnect failed: {}", e);
        None
      }
    }
  }

  async fn reauthenticate(&self) -> Result<(), JellyfinError> {
    let auth = self.client.authenticate(&self.username, &self.password).await?;
    let record = CredentialRecord {
      access_token: auth.access_token,
      user_id: auth.user.id,
    };
    if let Err(e) = self.credentials.save(&record) {
      log::error!("Failed to cache access token: {}", e);
    }
    Ok(())
  }
}
