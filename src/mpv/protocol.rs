//! MPV JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Global request ID counter for unique command identification.
static REQUEST_ID: AtomicI64 = AtomicI64::new(1);

/// Generate a unique request ID for MPV commands.
pub fn next_request_id() -> i64 {
  REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Observer IDs used for the properties the shim watches.
pub const OBS_EOF_REACHED: i64 = 1;
pub const OBS_TIME_POS: i64 = 2;
pub const OBS_PAUSE: i64 = 3;
pub const OBS_DURATION: i64 = 4;

/// Properties observed right after the IPC connection comes up.
pub const OBSERVED_PROPERTIES: [(i64, &str); 4] = [
  (OBS_EOF_REACHED, "eof-reached"),
  (OBS_TIME_POS, "time-pos"),
  (OBS_PAUSE, "pause"),
  (OBS_DURATION, "duration"),
];

/// `script-message` names emitted by the key bindings.
pub const MSG_NEXT: &str = "jellyfin-next";
pub const MSG_PREV: &str = "jellyfin-prev";

/// Command sent to MPV via IPC.
#[derive(Debug, Clone, Serialize)]
pub struct MpvCommand {
  pub command: Vec<serde_json::Value>,
  pub request_id: i64,
}

impl MpvCommand {
  /// Create a new command with auto-generated request ID.
  pub fn new(args: Vec<serde_json::Value>) -> Self {
    Self {
      command: args,
      request_id: next_request_id(),
    }
  }

  /// Load a file for playback, replacing whatever is playing.
  pub fn loadfile(url: &str) -> Self {
    Self::new(vec!["loadfile".into(), url.into(), "replace".into()])
  }

  /// Seek to absolute position in seconds.
  pub fn seek(time: f64) -> Self {
    Self::new(vec!["seek".into(), time.into(), "absolute".into()])
  }

  /// Set pause state.
  pub fn set_pause(paused: bool) -> Self {
    Self::new(vec!["set_property".into(), "pause".into(), paused.into()])
  }

  /// Observe a property for changes.
  pub fn observe_property(id: i64, name: &str) -> Self {
    Self::new(vec!["observe_property".into(), id.into(), name.into()])
  }

  /// Bind a key to an input command.
  pub fn keybind(key: &str, command: &str) -> Self {
    Self::new(vec!["keybind".into(), key.into(), command.into()])
  }

  /// Bind a key so that pressing it sends `script-message <message>` back to us.
  pub fn bind_script_message(key: &str, message: &str) -> Self {
    Self::keybind(key, &format!("script-message {}", message))
  }

  /// Command name, for logging.
  pub fn name(&self) -> &str {
    self
      .command
      .first()
      .and_then(|v| v.as_str())
      .unwrap_or("?")
  }
}

/// Response from MPV for a command.
#[derive(Debug, Clone, Deserialize)]
pub struct MpvResponse {
  /// "success" or error message.
  pub error: String,
  /// Response data (command-specific).
  #[serde(default)]
  pub data: Option<serde_json::Value>,
  /// Matching request ID.
  #[serde(default)]
  pub request_id: i64,
}

impl MpvResponse {
  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error == "success"
  }
}

/// Event sent by MPV (property changes, playback events, etc.).
#[derive(Debug, Clone, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g., "property-change", "file-loaded", "client-message").
  pub event: String,
  /// Observer ID for property-change events.
  pub id: Option<i64>,
  /// Property name for property-change events.
  pub name: Option<String>,
  /// Event data.
  pub data: Option<serde_json::Value>,
  /// Arguments for client-message events (from script-message command).
  pub args: Option<Vec<String>>,
}

/// Message received from MPV IPC (either response or event).
#[derive(Debug, Clone)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
}

impl MpvMessage {
  /// Parse a JSON line from MPV.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    if value.get("event").is_none() && value.get("error").is_some() {
      Ok(MpvMessage::Response(serde_json::from_value(value)?))
    } else {
      Ok(MpvMessage::Event(serde_json::from_value(value)?))
    }
  }
}

/// Player event as seen by the session orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
  /// The player finished opening the file and accepts seeks.
  FileLoaded,
  /// `eof-reached` flipped to true.
  EndOfStream,
  /// `time-pos` changed (seconds).
  TimePosition(f64),
  /// `pause` changed.
  Paused(bool),
  /// `duration` became known (seconds).
  Duration(f64),
  /// Next-episode key binding fired.
  Next,
  /// Previous-episode key binding fired.
  Previous,
}

impl PlayerEvent {
  /// Translate a raw MPV event. Events the shim does not care about map to `None`.
  pub fn from_mpv(event: &MpvEvent) -> Option<Self> {
    match event.event.as_str() {
      "file-loaded" => Some(PlayerEvent::FileLoaded),
      "property-change" => {
        let data = event.data.as_ref()?;
        match event.name.as_deref()? {
          "eof-reached" => match data.as_bool() {
            Some(true) => Some(PlayerEvent::EndOfStream),
            _ => None,
          },
          "time-pos" => data.as_f64().map(PlayerEvent::TimePosition),
          "pause" => data.as_bool().map(PlayerEvent::Paused),
          "duration" => data.as_f64().map(PlayerEvent::Duration),
          _ => None,
        }
      }
      "client-message" => match event.args.as_ref()?.first()?.as_str() {
        MSG_NEXT => Some(PlayerEvent::Next),
        MSG_PREV => Some(PlayerEvent::Previous),
        _ => None,
      },
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn event(json: &str) -> MpvEvent {
    match MpvMessage::parse(json).unwrap() {
      MpvMessage::Event(e) => e,
      other => panic!("Expected event, got {:?}", other),
    }
  }

  #[test]
  fn test_command_serialization() {
    let cmd = MpvCommand::loadfile("http://example.com/video.mp4");
    let json = serde_json::to_string(&cmd).unwrap();
    assert!(json.contains(r#""command":["loadfile","http://example.com/video.mp4","replace"]"#));
    assert!(json.contains("request_id"));
  }

  #[test]
  fn test_request_ids_increase() {
    let a = MpvCommand::set_pause(true);
    let b = MpvCommand::seek(1.0);
    assert!(b.request_id > a.request_id);
  }

  #[test]
  fn test_keybind_command() {
    let cmd = MpvCommand::bind_script_message(">", MSG_NEXT);
    assert_eq!(cmd.name(), "keybind");
    assert_eq!(cmd.command[1], ">");
    assert_eq!(cmd.command[2], "script-message jellyfin-next");
  }

  #[test]
  fn test_response_parsing() {
    let json = r#"{"error":"success","data":null,"request_id":1}"#;
    match MpvMessage::parse(json).unwrap() {
      MpvMessage::Response(r) => {
        assert!(r.is_success());
        assert_eq!(r.request_id, 1);
      }
      _ => panic!("Expected response"),
    }
  }

  #[test]
  fn test_event_parsing() {
    let e = event(r#"{"event":"property-change","id":3,"name":"pause","data":false}"#);
    assert_eq!(e.event, "property-change");
    assert_eq!(PlayerEvent::from_mpv(&e), Some(PlayerEvent::Paused(false)));
  }

  #[test]
  fn test_player_event_translation() {
    let time = event(r#"{"event":"property-change","id":2,"name":"time-pos","data":12.5}"#);
    assert_eq!(PlayerEvent::from_mpv(&time), Some(PlayerEvent::TimePosition(12.5)));

    let eof = event(r#"{"event":"property-change","id":1,"name":"eof-reached","data":true}"#);
    assert_eq!(PlayerEvent::from_mpv(&eof), Some(PlayerEvent::EndOfStream));

    let not_eof = event(r#"{"event":"property-change","id":1,"name":"eof-reached","data":false}"#);
    assert_eq!(PlayerEvent::from_mpv(&not_eof), None);

    let loaded = event(r#"{"event":"file-loaded"}"#);
    assert_eq!(PlayerEvent::from_mpv(&loaded), Some(PlayerEvent::FileLoaded));

    let next = event(r#"{"event":"client-message","args":["jellyfin-next"]}"#);
    assert_eq!(PlayerEvent::from_mpv(&next), Some(PlayerEvent::Next));

    let prev = event(r#"{"event":"client-message","args":["jellyfin-prev"]}"#);
    assert_eq!(PlayerEvent::from_mpv(&prev), Some(PlayerEvent::Previous));
  }

  #[test]
  fn test_unobserved_time_pos_is_ignored() {
    // time-pos is null while idle
    let e = event(r#"{"event":"property-change","id":2,"name":"time-pos"}"#);
    assert_eq!(PlayerEvent::from_mpv(&e), None);
  }
}
