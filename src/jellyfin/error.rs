//! Jellyfin error types.

use thiserror::Error;

/// Errors that can occur when interacting with Jellyfin.
#[derive(Debug, Error)]
pub enum JellyfinError {
  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("HTTP error: {0}")]
  HttpError(String),

  #[error("Unauthorized (token rejected)")]
  Unauthorized,

  #[error("WebSocket error: {0}")]
  WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

  #[error("JSON serialization error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("Authentication failed: {0}")]
  AuthFailed(String),

  #[error("Not connected to server")]
  NotConnected,

  #[error("Invalid server URL: {0}")]
  InvalidUrl(String),
}

impl JellyfinError {
  /// True when the server rejected our credentials, as opposed to being unreachable.
  pub fn is_unauthorized(&self) -> bool {
    match self {
      JellyfinError::Unauthorized => true,
      JellyfinError::Http(e) => e.status() == Some(reqwest::StatusCode::UNAUTHORIZED),
      JellyfinError::WebSocket(tokio_tungstenite::tungstenite::Error::Http(response)) => {
        response.status() == tokio_tungstenite::tungstenite::http::StatusCode::UNAUTHORIZED
      }
      _ => false,
    }
  }
}
