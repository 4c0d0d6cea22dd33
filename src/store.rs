//! On-disk state: saved playback positions and the cached access token.
//!
//! Both documents are small JSON files rewritten in full on every update. Writes
//! go to a temporary sibling first and are renamed into place, so a reader never
//! sees a half-written file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::jellyfin::{seconds_to_ticks, ticks_to_seconds};

/// Positions at or below this many seconds are never saved.
pub const POSITION_FLOOR_SECONDS: f64 = 10.0;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
}

/// Path of the saved-positions document for a device.
pub fn positions_file(data_dir: &Path, device_id: &str) -> PathBuf {
  data_dir.join(format!("playback_positions_{}.json", device_id))
}

/// Path of the credential document for a device.
pub fn credentials_file(data_dir: &Path, device_id: &str) -> PathBuf {
  data_dir.join(format!("jellyfin_token_{}.json", device_id))
}

/// Read a JSON document. A missing file is `Ok(None)`.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
  let json = match std::fs::read_to_string(path) {
    Ok(json) => json,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(e.into()),
  };
  Ok(Some(serde_json::from_str(&json)?))
}

/// Replace a JSON document atomically.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
  let json = serde_json::to_string_pretty(value)?;

  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }

  let temp_path = path.with_extension("json.tmp");
  std::fs::write(&temp_path, json)?;
  std::fs::rename(&temp_path, path)?;
  Ok(())
}

/// One saved resume point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPosition {
  pub position_ticks: i64,
  pub last_updated: DateTime<Utc>,
}

type Positions = HashMap<String, SavedPosition>;

/// Resume points keyed by item id, written through to disk on every change.
///
/// Writes happen inline until [`PositionStore::in_background`] moves them to a
/// writer task on the blocking pool.
pub struct PositionStore {
  path: PathBuf,
  positions: Positions,
  writer: Option<PositionWriter>,
}

/// Ordered background writer. Only the newest queued snapshot gets written.
struct PositionWriter {
  queue: mpsc::UnboundedSender<Positions>,
  task: JoinHandle<()>,
}

impl PositionWriter {
  fn spawn(path: PathBuf) -> Self {
    let (queue, mut snapshots) = mpsc::unbounded_channel::<Positions>();
    let task = tokio::spawn(async move {
      while let Some(mut snapshot) = snapshots.recv().await {
        while let Ok(newer) = snapshots.try_recv() {
          snapshot = newer;
        }
        let path = path.clone();
        match tokio::task::spawn_blocking(move || write_json(&path, &snapshot)).await {
          Ok(Ok(())) => {}
          Ok(Err(e)) => log::error!("Failed to save playback positions: {}", e),
          Err(e) => log::error!("Position writer failed: {}", e),
        }
      }
    });
    Self { queue, task }
  }
}

impl PositionStore {
  /// Load the store. An unreadable file is logged and treated as empty.
  pub fn open(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let positions = match read_json::<Positions>(&path) {
      Ok(Some(positions)) => {
        log::info!("Loaded {} saved playback positions", positions.len());
        positions
      }
      Ok(None) => HashMap::new(),
      Err(e) => {
        log::warn!("Ignoring unreadable position file {:?}: {}", path, e);
        HashMap::new()
      }
    };
    Self {
      path,
      positions,
      writer: None,
    }
  }

  /// Write from a background task from now on. Needs a tokio runtime.
  pub fn in_background(mut self) -> Self {
    self.writer = Some(PositionWriter::spawn(self.path.clone()));
    self
  }

  /// Wait until every queued write is on disk. Later writes happen inline.
  pub async fn flush(&mut self) {
    if let Some(writer) = self.writer.take() {
      drop(writer.queue);
      if let Err(e) = writer.task.await {
        log::error!("Position writer failed: {}", e);
      }
    }
  }

  /// Saved offset for an item, in seconds.
  pub fn get(&self, item_id: &str) -> Option<f64> {
    self
      .positions
      .get(item_id)
      .map(|saved| ticks_to_seconds(saved.position_ticks))
  }

  /// Remember `seconds` as the resume point for an item.
  ///
  /// Returns `false` without touching anything when the position is not past
  /// [`POSITION_FLOOR_SECONDS`].
  pub fn record(&mut self, item_id: &str, seconds: f64) -> bool {
    if seconds <= POSITION_FLOOR_SECONDS {
      return false;
    }

    self.positions.insert(
      item_id.to_string(),
      SavedPosition {
        position_ticks: seconds_to_ticks(seconds),
        last_updated: Utc::now(),
      },
    );
    self.save();
    true
  }

  /// Forget the resume point for an item.
  pub fn clear(&mut self, item_id: &str) {
    if self.positions.remove(item_id).is_some() {
      log::info!("Cleared saved position for {}", item_id);
      self.save();
    }
  }

  fn save(&self) {
    if let Some(writer) = &self.writer {
      if writer.queue.send(self.positions.clone()).is_ok() {
        return;
      }
      log::warn!("Position writer is gone, saving inline");
    }
    if let Err(e) = write_json(&self.path, &self.positions) {
      log::error!("Failed to save playback positions: {}", e);
    }
  }
}

/// Access token and the user it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
  pub access_token: String,
  pub user_id: String,
}

/// Cached credential for one device identity.
#[derive(Debug, Clone)]
pub struct CredentialCache {
  path: PathBuf,
}

impl CredentialCache {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// The cached credential, if a complete one exists.
  pub fn load(&self) -> Option<CredentialRecord> {
    match read_json::<CredentialRecord>(&self.path) {
      Ok(Some(record)) if !record.access_token.is_empty() && !record.user_id.is_empty() => {
        Some(record)
      }
      Ok(_) => None,
      Err(e) => {
        log::warn!("Ignoring unreadable credential file {:?}: {}", self.path, e);
        None
      }
    }
  }

  pub fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
    write_json(&self.path, record)?;
    log::info!("Saved access token to {:?}", self.path);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_position_floor() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = PositionStore::open(positions_file(dir.path(), "dev"));

    assert!(!store.record("item", 10.0));
    assert!(!store.record("item", 3.0));
    assert_eq!(store.get("item"), None);
    assert!(!dir.path().join("playback_positions_dev.json").exists());

    assert!(store.record("item", 42.5));
    assert_eq!(store.get("item"), Some(42.5));
  }

  #[test]
  fn test_positions_survive_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = positions_file(dir.path(), "dev");

    {
      let mut store = PositionStore::open(&path);
      store.record("a", 120.0);
      store.record("b", 30.0);
      store.clear("b");
    }

    let store = PositionStore::open(&path);
    assert_eq!(store.get("a"), Some(120.0));
    assert_eq!(store.get("b"), None);

    let raw: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["a"]["positionTicks"], 1_200_000_000i64);
    assert!(raw["a"]["lastUpdated"].is_string());
  }

  #[tokio::test]
  async fn test_background_writes_land_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = positions_file(dir.path(), "dev");

    let mut store = PositionStore::open(&path).in_background();
    for seconds in [20.0, 30.0, 40.0, 55.5] {
      store.record("a", seconds);
    }
    store.record("b", 90.0);
    store.clear("b");
    store.flush().await;

    let reloaded = PositionStore::open(&path);
    assert_eq!(reloaded.get("a"), Some(55.5));
    assert_eq!(reloaded.get("b"), None);
    assert!(!path.with_extension("json.tmp").exists());
  }

  #[test]
  fn test_corrupt_position_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = positions_file(dir.path(), "dev");
    std::fs::write(&path, "{ not json").unwrap();

    let store = PositionStore::open(&path);
    assert_eq!(store.get("anything"), None);
  }

  #[test]
  fn test_credential_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CredentialCache::new(credentials_file(dir.path(), "dev"));
    assert_eq!(cache.load(), None);

    let record = CredentialRecord {
      access_token: "token".to_string(),
      user_id: "user".to_string(),
    };
    cache.save(&record).unwrap();
    assert_eq!(cache.load(), Some(record));
    assert!(!dir.path().join("jellyfin_token_dev.json.tmp").exists());
  }

  #[test]
  fn test_partial_credential_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = credentials_file(dir.path(), "dev");
    std::fs::write(&path, r#"{"accessToken":"","userId":"user"}"#).unwrap();
    assert_eq!(CredentialCache::new(path).load(), None);
  }
}
