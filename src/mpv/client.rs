//! High-level MPV client: owns the player process and its IPC connection.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use super::ipc::{IpcError, MpvIpc};
use super::process::{cleanup_ipc, mpv_args, spawn_mpv, MpvProcess, ProcessError};
use super::protocol::{MpvCommand, PlayerEvent};

#[derive(Error, Debug)]
pub enum MpvError {
  #[error("Process error: {0}")]
  Process(#[from] ProcessError),
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
  #[error("Not connected")]
  NotConnected,
}

/// Something that happened to the player of a given session generation.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerSignal {
  /// An event read from the IPC stream.
  Event(PlayerEvent),
  /// An IPC connection attempt succeeded.
  IpcConnected,
  /// An IPC connection attempt failed.
  IpcFailed(String),
  /// The player process is gone.
  Exited(Option<i32>),
}

/// Receives player signals tagged with the generation that produced them.
pub type SignalSink = Arc<dyn Fn(u64, PlayerSignal) + Send + Sync>;

/// The operations the session orchestrator needs from a player.
///
/// Everything here returns immediately. Slow work (connecting, waiting for exit)
/// reports back through the [`SignalSink`].
pub trait Player {
  /// Spawn a fresh player process for `generation`.
  fn launch(&mut self, generation: u64, title: &str) -> Result<(), MpvError>;
  /// True while the current process has not exited.
  fn is_alive(&self) -> bool;
  /// Start one IPC connection attempt; the outcome arrives as a signal.
  fn connect(&mut self, generation: u64);
  /// Send a command over the current IPC connection.
  fn send(&mut self, command: MpvCommand) -> Result<(), MpvError>;
  /// Close the IPC connection and kill the process.
  fn shutdown(&mut self);
}

/// Where the player binary lives and how it is started.
#[derive(Debug, Clone)]
pub struct MpvSettings {
  pub mpv_path: Option<PathBuf>,
  pub extra_args: Vec<String>,
  pub ipc_path: String,
}

/// IPC connection slot, tagged with the generation allowed to fill it.
struct IpcSlot {
  generation: u64,
  conn: Option<MpvIpc>,
}

/// MPV player backed by a real process and socket.
pub struct MpvClient {
  settings: MpvSettings,
  sink: SignalSink,
  process: Option<MpvProcess>,
  ipc: Arc<Mutex<IpcSlot>>,
}

impl MpvClient {
  /// Create a new MPV client.
  pub fn new(settings: MpvSettings, sink: SignalSink) -> Self {
    Self {
      settings,
      sink,
      process: None,
      ipc: Arc::new(Mutex::new(IpcSlot {
        generation: 0,
        conn: None,
      })),
    }
  }
}

impl Player for MpvClient {
  fn launch(&mut self, generation: u64, title: &str) -> Result<(), MpvError> {
    if let Some(previous) = self.process.take() {
      log::warn!("Replacing MPV process {} that was still attached", previous.pid());
      previous.kill();
    }
    cleanup_ipc(&self.settings.ipc_path);

    let args = mpv_args(&self.settings.ipc_path, title, &self.settings.extra_args);
    let sink = self.sink.clone();
    let process = spawn_mpv(self.settings.mpv_path.as_deref(), &args, move |code| {
      sink(generation, PlayerSignal::Exited(code));
    })?;

    self.process = Some(process);
    let mut slot = self.ipc.lock();
    slot.generation = generation;
    slot.conn = None;
    Ok(())
  }

  fn is_alive(&self) -> bool {
    self.process.as_ref().is_some_and(MpvProcess::is_alive)
  }

  fn connect(&mut self, generation: u64) {
    let path = self.settings.ipc_path.clone();
    let sink = self.sink.clone();
    let slot = self.ipc.clone();

    tokio::spawn(async move {
      let event_sink = sink.clone();
      let result = MpvIpc::connect(&path, move |event| {
        event_sink(generation, PlayerSignal::Event(event));
      })
      .await;

      match result {
        Ok(conn) => {
          {
            let mut slot = slot.lock();
            if slot.generation != generation {
              log::debug!("Dropping IPC connection for superseded session {}", generation);
              return;
            }
            if let Some(old) = slot.conn.replace(conn) {
              old.close();
            }
          }
          log::info!("Connected to MPV IPC at {}", path);
          sink(generation, PlayerSignal::IpcConnected);
        }
        Err(e) => sink(generation, PlayerSignal::IpcFailed(e.to_string())),
      }
    });
  }

  fn send(&mut self, command: MpvCommand) -> Result<(), MpvError> {
    let slot = self.ipc.lock();
    let conn = slot.conn.as_ref().ok_or(MpvError::NotConnected)?;
    conn.send(&command)?;
    Ok(())
  }

  fn shutdown(&mut self) {
    {
      let mut slot = self.ipc.lock();
      slot.generation = 0;
      if let Some(conn) = slot.conn.take() {
        log::info!("Closing IPC connection");
        conn.close();
      }
    }

    if let Some(process) = self.process.take() {
      log::info!("Stopping MPV (pid: {})", process.pid());
      process.kill();
    }

    cleanup_ipc(&self.settings.ipc_path);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[cfg(target_os = "linux")]
  #[tokio::test]
  async fn test_shutdown_reaps_player_before_next_launch() {
    let dir = tempfile::tempdir().unwrap();
    let settings = MpvSettings {
      mpv_path: Some(PathBuf::from("sleep")),
      extra_args: vec!["30".to_string()],
      ipc_path: dir.path().join("mpv.sock").to_string_lossy().into_owned(),
    };
    let sink: SignalSink = Arc::new(|_, _| {});
    let mut client = MpvClient::new(settings, sink);

    client.launch(1, "first").unwrap();
    let first = client.process.as_ref().unwrap().pid();
    client.shutdown();
    assert!(!client.is_alive());
    assert!(!std::path::Path::new(&format!("/proc/{}", first)).exists());

    client.launch(2, "second").unwrap();
    let second = client.process.as_ref().unwrap().pid();
    assert_ne!(first, second);
    client.shutdown();
    assert!(!std::path::Path::new(&format!("/proc/{}", second)).exists());
  }
}
