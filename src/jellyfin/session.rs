//! Session orchestrator - coordinates Jellyfin commands with the MPV player.
//!
//! Everything that can happen to a playback session arrives as an [`Event`] on one
//! channel and is handled to completion before the next one. Each session gets a
//! generation number; process exits, IPC traffic, timers and metadata lookups
//! carry the generation that started them, so leftovers from a superseded session
//! are recognised and dropped.

use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::client::redact_url;
use super::navigation::ItemContext;
use super::types::*;
use super::websocket::{HubCommand, PlaystateCommand};
use crate::mpv::{MpvCommand, Player, PlayerEvent, PlayerSignal, MSG_NEXT, MSG_PREV, OBSERVED_PROPERTIES};
use crate::store::PositionStore;
use crate::timer::{TimerKind, TimerSink, Timers};

/// Wait between spawning MPV and the first IPC attempt, and between retries.
const IPC_RETRY_DELAY: Duration = Duration::from_millis(500);
/// IPC connection attempts before the session is abandoned.
const IPC_MAX_ATTEMPTS: u32 = 10;
/// "Previous" restarts the current item past this position (seconds).
const RESTART_THRESHOLD_SECONDS: f64 = 30.0;
/// Share of the runtime after which an item counts as watched.
const WATCHED_RATIO: f64 = 0.9;

/// Item metadata plus the URL MPV should open.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedItem {
  pub context: ItemContext,
  pub stream_url: String,
}

/// Input to the orchestrator.
#[derive(Debug, Clone)]
pub enum Event {
  /// Command from the Jellyfin control channel.
  Remote(HubCommand),
  /// Metadata lookup finished. `None` when the item cannot be played at all.
  Resolved {
    generation: u64,
    item: Option<ResolvedItem>,
  },
  /// Something happened to the player.
  Player { generation: u64, signal: PlayerSignal },
  /// A session timer fired.
  Timer { generation: u64, kind: TimerKind },
  /// Stop playback and leave the dispatch loop.
  Shutdown,
}

/// Outbound report to the server, delivered in order.
#[derive(Debug, Clone, PartialEq)]
pub enum HubReport {
  Start(PlaybackStartInfo),
  Progress(PlaybackProgressInfo),
  Stop(PlaybackStopInfo),
  MarkPlayed(String),
}

/// The server side as seen by the orchestrator. Nothing here blocks.
pub trait Hub {
  /// Look up `item_id`; the answer comes back as [`Event::Resolved`].
  fn resolve(&mut self, generation: u64, item_id: &str);
  /// Queue a report.
  fn report(&mut self, report: HubReport);
}

/// Tunables for playback sessions.
#[derive(Debug, Clone)]
pub struct SessionSettings {
  /// Delay between IPC connect and `loadfile`.
  pub load_delay: Duration,
  pub progress_interval: Duration,
  pub keybinds_next: Vec<String>,
  pub keybinds_prev: Vec<String>,
}

impl Default for SessionSettings {
  fn default() -> Self {
    Self {
      load_delay: Duration::from_millis(100),
      progress_interval: Duration::from_secs(10),
      keybinds_next: vec!["MEDIA_NEXT".to_string(), ">".to_string()],
      keybinds_prev: vec!["MEDIA_PREV".to_string(), "<".to_string()],
    }
  }
}

/// Where the current session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
  Idle,
  Starting,
  Playing,
  Paused,
  Stopping,
}

/// A Play command waiting for its metadata.
#[derive(Debug)]
struct PendingPlay {
  generation: u64,
  item_id: String,
  start_seconds: f64,
}

/// The single active playback session.
#[derive(Debug)]
struct Session {
  generation: u64,
  item_id: String,
  play_session_id: String,
  context: ItemContext,
  stream_url: String,
  state: PlaybackState,
  /// Live position in seconds.
  position: f64,
  /// Duration reported by MPV, used when the server has no runtime.
  duration: f64,
  paused: bool,
  /// Resume offset to seek to once the file is loaded.
  pending_seek: f64,
  ipc_attempts: u32,
  marked_watched: bool,
  stop_reported: bool,
}

impl Session {
  fn position_ticks(&self) -> i64 {
    seconds_to_ticks(self.position)
  }

  /// Runtime used for the watched check.
  fn runtime(&self) -> f64 {
    if self.context.runtime_seconds > 0.0 {
      self.context.runtime_seconds
    } else {
      self.duration
    }
  }
}

/// Owns the playback session and drives the player from remote commands.
pub struct Orchestrator<H: Hub, P: Player> {
  hub: H,
  player: P,
  positions: PositionStore,
  timers: Timers,
  settings: SessionSettings,
  generation: u64,
  pending: Option<PendingPlay>,
  session: Option<Session>,
}

impl<H: Hub, P: Player> Orchestrator<H, P> {
  pub fn new(
    hub: H,
    player: P,
    positions: PositionStore,
    timer_sink: TimerSink,
    settings: SessionSettings,
  ) -> Self {
    Self {
      hub,
      player,
      positions,
      timers: Timers::new(timer_sink),
      settings,
      generation: 0,
      pending: None,
      session: None,
    }
  }

  pub fn state(&self) -> PlaybackState {
    match (&self.session, &self.pending) {
      (Some(session), _) => session.state,
      (None, Some(_)) => PlaybackState::Starting,
      (None, None) => PlaybackState::Idle,
    }
  }

  /// Handle events until shutdown or until every sender is gone.
  pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
      if !self.handle(event) {
        break;
      }
    }
    self.shutdown();
    self.positions.flush().await;
    log::info!("Session orchestrator stopped");
  }

  /// Handle one event. Returns `false` once shutdown was requested.
  pub fn handle(&mut self, event: Event) -> bool {
    match event {
      Event::Remote(command) => self.handle_command(command),
      Event::Resolved { generation, item } => self.handle_resolved(generation, item),
      Event::Player { generation, signal } => {
        if self.is_current(generation) {
          self.handle_signal(signal);
        } else {
          log::debug!("Ignoring {:?} from superseded session {}", signal, generation);
        }
      }
      Event::Timer { generation, kind } => {
        if self.is_current(generation) {
          self.handle_timer(kind);
        }
      }
      Event::Shutdown => {
        self.shutdown();
        return false;
      }
    }
    true
  }

  fn is_current(&self, generation: u64) -> bool {
    self
      .session
      .as_ref()
      .is_some_and(|s| s.generation == generation)
  }

  fn handle_command(&mut self, command: HubCommand) {
    match command {
      HubCommand::Play(request) => {
        let Some(item_id) = request.item_ids.first() else {
          log::warn!("Play command without item ids");
          return;
        };
        let start_ticks = request.start_position_ticks.unwrap_or(0);
        let mut start_seconds = ticks_to_seconds(start_ticks.max(0));
        if start_ticks <= 0 {
          if let Some(saved) = self.positions.get(item_id) {
            log::info!("Resuming {} from saved position {:.2}s", item_id, saved);
            start_seconds = saved;
          }
        }
        self.play(item_id.clone(), start_seconds);
      }
      HubCommand::Playstate(command) => self.handle_playstate(command),
    }
  }

  fn handle_playstate(&mut self, command: PlaystateCommand) {
    if command == PlaystateCommand::Stop {
      self.force_stop();
      return;
    }
    let Some(session) = self.session.as_ref() else {
      log::debug!("Ignoring {:?} without an active session", command);
      return;
    };

    match command {
      PlaystateCommand::Stop => {}
      PlaystateCommand::Pause => self.send(MpvCommand::set_pause(true)),
      PlaystateCommand::Unpause => self.send(MpvCommand::set_pause(false)),
      PlaystateCommand::PlayPause => {
        let paused = session.paused;
        self.send(MpvCommand::set_pause(!paused));
      }
      PlaystateCommand::Seek(ticks) => {
        let seconds = ticks_to_seconds(ticks);
        log::info!("Seek requested to {:.2}s", seconds);
        self.send(MpvCommand::seek(seconds));
      }
      PlaystateCommand::NextTrack => self.next(),
      PlaystateCommand::PreviousTrack => self.previous(),
    }
  }

  /// Tear down whatever is playing and start resolving `item_id`.
  fn play(&mut self, item_id: String, start_seconds: f64) {
    self.force_stop();

    self.generation += 1;
    log::info!(
      "Starting playback of {} at {:.2}s (session {})",
      item_id,
      start_seconds,
      self.generation
    );
    self.hub.resolve(self.generation, &item_id);
    self.pending = Some(PendingPlay {
      generation: self.generation,
      item_id,
      start_seconds,
    });
  }

  fn handle_resolved(&mut self, generation: u64, item: Option<ResolvedItem>) {
    if self.pending.as_ref().map(|p| p.generation) != Some(generation) {
      log::debug!("Ignoring metadata for superseded session {}", generation);
      return;
    }
    let Some(pending) = self.pending.take() else {
      return;
    };
    let Some(item) = item else {
      log::error!("Cannot play {}: no stream available", pending.item_id);
      return;
    };

    let title = item.context.window_title();
    if let Err(e) = self.player.launch(generation, &title) {
      log::error!("Failed to start MPV: {}", e);
      return;
    }
    log::info!("Started playback: {} - {}", title, redact_url(&item.stream_url));

    let session = Session {
      generation,
      item_id: pending.item_id,
      play_session_id: Uuid::new_v4().to_string(),
      context: item.context,
      stream_url: item.stream_url,
      state: PlaybackState::Starting,
      position: pending.start_seconds,
      duration: 0.0,
      paused: false,
      pending_seek: pending.start_seconds,
      ipc_attempts: 0,
      marked_watched: false,
      stop_reported: false,
    };

    self.hub.report(HubReport::Start(PlaybackStartInfo {
      item_id: session.item_id.clone(),
      play_session_id: session.play_session_id.clone(),
      position_ticks: session.position_ticks(),
      is_paused: false,
      is_muted: false,
      volume_level: 100,
      play_method: "DirectPlay".to_string(),
      can_seek: true,
    }));

    self
      .timers
      .every(TimerKind::Progress, generation, self.settings.progress_interval);
    self.timers.once(TimerKind::IpcConnect, generation, IPC_RETRY_DELAY);
    self.session = Some(session);
  }

  fn handle_timer(&mut self, kind: TimerKind) {
    match kind {
      TimerKind::Progress => self.report_progress(),
      TimerKind::IpcConnect => self.connect_ipc(),
      TimerKind::LoadFile => {
        let Some(session) = self.session.as_ref() else {
          return;
        };
        log::info!("Loading {}", redact_url(&session.stream_url));
        let command = MpvCommand::loadfile(&session.stream_url);
        self.send(command);
      }
    }
  }

  fn report_progress(&mut self) {
    let Some(session) = self.session.as_ref() else {
      return;
    };

    self.hub.report(HubReport::Progress(PlaybackProgressInfo {
      item_id: session.item_id.clone(),
      play_session_id: session.play_session_id.clone(),
      position_ticks: session.position_ticks(),
      is_paused: session.paused,
      is_muted: false,
      volume_level: 100,
      play_method: "DirectPlay".to_string(),
    }));
    self.positions.record(&session.item_id, session.position);
  }

  fn connect_ipc(&mut self) {
    let Some(session) = self.session.as_mut() else {
      return;
    };
    if !self.player.is_alive() {
      log::info!("MPV is not running, giving up on IPC connection");
      return;
    }

    session.ipc_attempts += 1;
    log::info!(
      "Connecting to MPV IPC (attempt {}/{})",
      session.ipc_attempts,
      IPC_MAX_ATTEMPTS
    );
    self.player.connect(session.generation);
  }

  fn handle_signal(&mut self, signal: PlayerSignal) {
    match signal {
      PlayerSignal::IpcConnected => self.on_ipc_connected(),
      PlayerSignal::IpcFailed(reason) => self.on_ipc_failed(&reason),
      PlayerSignal::Exited(code) => {
        log::info!("MPV exited (code: {:?})", code);
        self.finish();
      }
      PlayerSignal::Event(event) => self.handle_player_event(event),
    }
  }

  fn on_ipc_connected(&mut self) {
    let Some(generation) = self.session.as_ref().map(|s| s.generation) else {
      return;
    };

    for (id, name) in OBSERVED_PROPERTIES {
      self.send(MpvCommand::observe_property(id, name));
    }
    let bindings: Vec<(String, &str)> = self
      .settings
      .keybinds_next
      .iter()
      .map(|key| (key.clone(), MSG_NEXT))
      .chain(self.settings.keybinds_prev.iter().map(|key| (key.clone(), MSG_PREV)))
      .collect();
    for (key, message) in bindings {
      self.send(MpvCommand::bind_script_message(&key, message));
    }

    self
      .timers
      .once(TimerKind::LoadFile, generation, self.settings.load_delay);
  }

  fn on_ipc_failed(&mut self, reason: &str) {
    let Some(session) = self.session.as_ref() else {
      return;
    };
    log::warn!(
      "IPC connection attempt {} failed: {}",
      session.ipc_attempts,
      reason
    );

    if !self.player.is_alive() {
      log::info!("MPV exited while connecting, not retrying");
      return;
    }
    if session.ipc_attempts >= IPC_MAX_ATTEMPTS {
      log::error!("Could not connect to MPV after {} attempts", IPC_MAX_ATTEMPTS);
      self.force_stop();
      return;
    }
    let generation = session.generation;
    self.timers.once(TimerKind::IpcConnect, generation, IPC_RETRY_DELAY);
  }

  fn handle_player_event(&mut self, event: PlayerEvent) {
    let Some(session) = self.session.as_mut() else {
      return;
    };

    match event {
      PlayerEvent::FileLoaded => {
        log::info!("MPV loaded the file");
        if session.state == PlaybackState::Starting {
          session.state = if session.paused {
            PlaybackState::Paused
          } else {
            PlaybackState::Playing
          };
        }
        if session.pending_seek > 0.0 {
          let offset = session.pending_seek;
          session.pending_seek = 0.0;
          log::info!("Seeking to resume position {:.2}s", offset);
          self.send(MpvCommand::seek(offset));
        }
      }
      PlayerEvent::TimePosition(position) => session.position = position,
      PlayerEvent::Duration(duration) => session.duration = duration,
      PlayerEvent::Paused(paused) => {
        session.paused = paused;
        if session.state != PlaybackState::Starting {
          session.state = if paused {
            PlaybackState::Paused
          } else {
            PlaybackState::Playing
          };
        }
      }
      PlayerEvent::EndOfStream => {
        log::info!("Playback reached the end of the file");
        if !session.stop_reported && !session.marked_watched {
          self.mark_watched();
        }
        self.advance();
      }
      PlayerEvent::Next => self.next(),
      PlayerEvent::Previous => self.previous(),
    }
  }

  /// Key or remote "next": same as reaching the end, without marking watched.
  fn next(&mut self) {
    let Some(session) = self.session.as_ref() else {
      return;
    };
    if session.context.series.is_none() {
      log::debug!("Next ignored: {} is not an episode", session.item_id);
      return;
    }
    self.advance();
  }

  fn previous(&mut self) {
    let Some(session) = self.session.as_ref() else {
      return;
    };
    let Some(series) = session.context.series.as_ref() else {
      log::debug!("Previous ignored: {} is not an episode", session.item_id);
      return;
    };

    if session.position > RESTART_THRESHOLD_SECONDS {
      log::info!("Restarting current episode");
      let item_id = session.item_id.clone();
      self.play(item_id, 0.0);
    } else if let Some(previous) = series.previous() {
      log::info!("Playing previous episode: {}", previous.name);
      let item_id = previous.id.clone();
      self.play(item_id, 0.0);
    } else {
      log::info!("Already at the first episode");
    }
  }

  /// Play the next episode, or end the session when there is none.
  fn advance(&mut self) {
    let next = self
      .session
      .as_ref()
      .and_then(|s| s.context.series.as_ref())
      .and_then(|series| series.next())
      .map(|ep| (ep.id.clone(), ep.name.clone()));

    match next {
      Some((item_id, name)) => {
        log::info!("Playing next episode: {}", name);
        self.play(item_id, 0.0);
      }
      None => {
        log::info!("No next episode, ending session");
        self.force_stop();
      }
    }
  }

  fn mark_watched(&mut self) {
    let Some(session) = self.session.as_mut() else {
      return;
    };
    if session.marked_watched {
      return;
    }
    session.marked_watched = true;
    log::info!("Marking {} as watched", session.item_id);
    self.hub.report(HubReport::MarkPlayed(session.item_id.clone()));
    self.positions.clear(&session.item_id);
  }

  /// Stop the current session right away, including one still being resolved.
  fn force_stop(&mut self) {
    if let Some(pending) = self.pending.take() {
      log::info!("Cancelling pending playback of {}", pending.item_id);
    }
    if self.session.is_some() {
      log::info!("Stopping current playback");
      self.finish();
    }
  }

  /// End the session: release the player, settle watched state, report stop once.
  fn finish(&mut self) {
    let Some(session) = self.session.as_mut() else {
      return;
    };
    session.state = PlaybackState::Stopping;

    self.timers.cancel_all();
    self.player.shutdown();

    let runtime = session.runtime();
    let completed = runtime > 0.0 && session.position >= runtime * WATCHED_RATIO;
    if completed && !session.marked_watched {
      self.mark_watched();
    }

    let Some(mut session) = self.session.take() else {
      return;
    };
    if !session.marked_watched {
      self.positions.record(&session.item_id, session.position);
    }

    if !session.stop_reported {
      session.stop_reported = true;
      log::info!(
        "Playback of {} stopped at {:.2}s",
        session.item_id,
        session.position
      );
      self.hub.report(HubReport::Stop(PlaybackStopInfo {
        item_id: session.item_id.clone(),
        play_session_id: session.play_session_id.clone(),
        position_ticks: session.position_ticks(),
      }));
    }
  }

  fn shutdown(&mut self) {
    self.timers.cancel_all();
    self.force_stop();
  }

  fn send(&mut self, command: MpvCommand) {
    let name = command.name().to_string();
    if let Err(e) = self.player.send(command) {
      log::warn!("Failed to send {} to MPV: {}", name, e);
    }
  }
}
