//! Jellyfin API types.
//!
//! These types mirror the Jellyfin API responses and requests.

use serde::{Deserialize, Serialize};

/// Authentication response from Jellyfin.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthResponse {
  pub user: User,
  pub access_token: String,
  #[serde(default)]
  pub server_id: Option<String>,
}

/// Jellyfin user information.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
  pub id: String,
  #[serde(default)]
  pub name: String,
}

/// WebSocket message envelope from Jellyfin server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WsMessage {
  pub message_type: String,
  #[serde(default)]
  pub data: Option<serde_json::Value>,
}

/// Play command from Jellyfin (via WebSocket).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayRequest {
  #[serde(default)]
  pub item_ids: Vec<String>,
  #[serde(default)]
  pub start_position_ticks: Option<i64>,
}

/// Playstate command from Jellyfin.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaystateRequest {
  pub command: String,
  #[serde(default)]
  pub seek_position_ticks: Option<i64>,
}

/// Media item (movie, episode, etc.).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MediaItem {
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(rename = "Type", default)]
  pub item_type: String,
  #[serde(default)]
  pub series_id: Option<String>,
  #[serde(default)]
  pub series_name: Option<String>,
  #[serde(default)]
  pub season_id: Option<String>,
  #[serde(default)]
  pub index_number: Option<i32>,
  #[serde(default)]
  pub parent_index_number: Option<i32>,
  #[serde(default)]
  pub run_time_ticks: Option<i64>,
}

impl MediaItem {
  /// True for TV episodes that belong to a series.
  pub fn is_episode(&self) -> bool {
    self.item_type == "Episode" && self.series_id.is_some()
  }

  /// Runtime in seconds, 0 when the server does not know it.
  pub fn runtime_seconds(&self) -> f64 {
    self.run_time_ticks.map(ticks_to_seconds).unwrap_or(0.0)
  }
}

/// Response from /Shows/{seriesId}/Episodes endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EpisodesResponse {
  pub items: Vec<MediaItem>,
  #[serde(default)]
  pub total_record_count: i32,
}

/// Playback start info (sent to Jellyfin when playback starts).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackStartInfo {
  pub item_id: String,
  pub play_session_id: String,
  pub position_ticks: i64,
  pub is_paused: bool,
  pub is_muted: bool,
  pub volume_level: i32,
  pub play_method: String,
  pub can_seek: bool,
}

/// Playback progress info (sent periodically to Jellyfin).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackProgressInfo {
  pub item_id: String,
  pub play_session_id: String,
  pub position_ticks: i64,
  pub is_paused: bool,
  pub is_muted: bool,
  pub volume_level: i32,
  pub play_method: String,
}

/// Playback stop info (sent when playback ends).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackStopInfo {
  pub item_id: String,
  pub play_session_id: String,
  pub position_ticks: i64,
}

/// Ticks conversion helpers (1 tick = 100 nanoseconds).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Convert seconds to ticks.
pub fn seconds_to_ticks(seconds: f64) -> i64 {
  (seconds * TICKS_PER_SECOND as f64).round() as i64
}

/// Convert ticks to seconds.
pub fn ticks_to_seconds(ticks: i64) -> f64 {
  ticks as f64 / TICKS_PER_SECOND as f64
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ticks_conversion() {
    assert_eq!(seconds_to_ticks(1.5), 15_000_000);
    assert_eq!(ticks_to_seconds(450_000_000), 45.0);
  }

  #[test]
  fn test_play_request_parsing() {
    let data = serde_json::json!({
      "ItemIds": ["abc", "def"],
      "StartPositionTicks": 600000000,
      "PlayCommand": "PlayNow"
    });
    let request: PlayRequest = serde_json::from_value(data).unwrap();
    assert_eq!(request.item_ids, vec!["abc", "def"]);
    assert_eq!(request.start_position_ticks, Some(600_000_000));
  }

  #[test]
  fn test_episode_detection() {
    let item: MediaItem = serde_json::from_value(serde_json::json!({
      "Id": "ep1",
      "Name": "Pilot",
      "Type": "Episode",
      "SeriesId": "show",
      "SeasonId": "s1",
      "IndexNumber": 1,
      "ParentIndexNumber": 1,
      "RunTimeTicks": 13_000_000_000i64
    }))
    .unwrap();
    assert!(item.is_episode());
    assert_eq!(item.runtime_seconds(), 1300.0);

    let movie: MediaItem =
      serde_json::from_value(serde_json::json!({ "Id": "m", "Name": "Film", "Type": "Movie" })).unwrap();
    assert!(!movie.is_episode());
    assert_eq!(movie.runtime_seconds(), 0.0);
  }
}
