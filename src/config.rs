//! Application configuration loaded from a JSON file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const APP_DIR: &str = "jellyfin-mpv-shim";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("Failed to read config {0:?}: {1}")]
  Read(PathBuf, #[source] std::io::Error),
  #[error("Invalid config JSON: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
  /// Jellyfin server base URL, e.g. `http://192.168.1.10:8096`.
  pub server_url: String,

  pub username: String,

  #[serde(default)]
  pub password: String,

  /// Custom MPV executable path (None = auto-detect).
  #[serde(default)]
  pub mpv_path: Option<String>,

  /// Additional MPV command-line arguments.
  #[serde(default)]
  pub mpv_args: Vec<String>,

  /// Device name shown in Jellyfin cast menu.
  #[serde(default = "default_device_name")]
  pub device_name: String,

  /// Stable device identity. Derived from the device name when unset.
  #[serde(default)]
  pub device_id: Option<String>,

  /// MPV IPC socket (Unix) or named pipe (Windows).
  #[serde(default)]
  pub ipc_socket_path: Option<String>,

  /// Delay between IPC connect and `loadfile`, in milliseconds.
  #[serde(default = "default_load_delay_ms")]
  pub load_delay_ms: u64,

  /// Progress reporting interval in seconds.
  #[serde(default = "default_progress_interval")]
  pub progress_interval: u32,

  /// Where the token and position files live.
  #[serde(default)]
  pub data_dir: Option<String>,

  /// Keys that jump to the next episode in MPV.
  #[serde(default = "default_keybinds_next")]
  pub keybinds_next: Vec<String>,

  /// Keys that jump to the previous episode in MPV.
  #[serde(default = "default_keybinds_prev")]
  pub keybinds_prev: Vec<String>,
}

fn default_device_name() -> String {
  "MPV Shim".to_string()
}

fn default_load_delay_ms() -> u64 {
  100
}

fn default_progress_interval() -> u32 {
  10
}

fn default_keybinds_next() -> Vec<String> {
  vec!["MEDIA_NEXT".to_string(), ">".to_string()]
}

fn default_keybinds_prev() -> Vec<String> {
  vec!["MEDIA_PREV".to_string(), "<".to_string()]
}

impl AppConfig {
  /// Default config location: `<config_dir>/jellyfin-mpv-shim/config.json`.
  pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
  }

  /// Read and validate a config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    let config: AppConfig = serde_json::from_str(&json)?;
    config.validate()?;
    Ok(config)
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), ConfigError> {
    let url = self.server_url.trim();
    if !url.starts_with("http://") && !url.starts_with("https://") {
      return Err(ConfigError::Invalid(
        "serverUrl must start with http:// or https://".to_string(),
      ));
    }
    if self.username.trim().is_empty() {
      return Err(ConfigError::Invalid("username cannot be empty".to_string()));
    }
    if self.device_name.trim().is_empty() {
      return Err(ConfigError::Invalid("Device name cannot be empty".to_string()));
    }
    if self.progress_interval < 1 || self.progress_interval > 60 {
      return Err(ConfigError::Invalid(
        "Progress interval must be between 1 and 60 seconds".to_string(),
      ));
    }
    if self.keybinds_next.iter().chain(&self.keybinds_prev).any(|k| k.trim().is_empty()) {
      return Err(ConfigError::Invalid("Keybindings cannot be empty".to_string()));
    }
    Ok(())
  }

  /// Server URL without a trailing slash.
  pub fn server_url(&self) -> String {
    self.server_url.trim().trim_end_matches('/').to_string()
  }

  /// The configured device id, or one derived from the device name.
  pub fn device_id(&self) -> String {
    if let Some(id) = self.device_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
      return id.to_string();
    }
    let slug: String = self
      .device_name
      .trim()
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
      .collect();
    format!("mpv-{}", slug)
  }

  /// Data directory, defaulting to `<data_dir>/jellyfin-mpv-shim`.
  pub fn data_dir(&self) -> PathBuf {
    self
      .data_dir
      .as_deref()
      .filter(|s| !s.is_empty())
      .map(PathBuf::from)
      .or_else(|| dirs::data_dir().map(|dir| dir.join(APP_DIR)))
      .unwrap_or_else(|| PathBuf::from("data"))
  }

  /// MPV executable override, if any.
  pub fn mpv_path(&self) -> Option<PathBuf> {
    self
      .mpv_path
      .as_deref()
      .filter(|s| !s.is_empty())
      .map(PathBuf::from)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn minimal() -> AppConfig {
    serde_json::from_value(serde_json::json!({
      "serverUrl": "http://jellyfin.local:8096/",
      "username": "alice",
      "password": "secret"
    }))
    .unwrap()
  }

  #[test]
  fn test_defaults() {
    let config = minimal();
    assert_eq!(config.load_delay_ms, 100);
    assert_eq!(config.progress_interval, 10);
    assert_eq!(config.keybinds_next, vec!["MEDIA_NEXT", ">"]);
    assert_eq!(config.keybinds_prev, vec!["MEDIA_PREV", "<"]);
    assert_eq!(config.server_url(), "http://jellyfin.local:8096");
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_device_id_derivation() {
    let mut config = minimal();
    config.device_name = "Living Room PC".to_string();
    assert_eq!(config.device_id(), "mpv-living-room-pc");

    config.device_id = Some("fixed-id".to_string());
    assert_eq!(config.device_id(), "fixed-id");
  }

  #[test]
  fn test_validation_errors() {
    let mut config = minimal();
    config.server_url = "jellyfin.local".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let mut config = minimal();
    config.progress_interval = 0;
    assert!(config.validate().is_err());

    let mut config = minimal();
    config.keybinds_prev = vec![" ".to_string()];
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
      &path,
      r#"{"serverUrl":"https://media.example","username":"bob","mpvArgs":["--fs"],"loadDelayMs":250}"#,
    )
    .unwrap();

    let config = AppConfig::load(&path).unwrap();
    assert_eq!(config.mpv_args, vec!["--fs"]);
    assert_eq!(config.load_delay_ms, 250);

    assert!(matches!(
      AppConfig::load(&dir.path().join("missing.json")),
      Err(ConfigError::Read(_, _))
    ));
  }
}
