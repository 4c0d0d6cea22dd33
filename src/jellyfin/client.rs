//! Jellyfin HTTP client for REST API calls.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};

use super::error::JellyfinError;
use super::types::*;

const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commands advertised to the server; everything else is ignored anyway.
const SUPPORTED_COMMANDS: [&str; 4] = ["Play", "Playstate", "PlayNext", "PlayMediaSource"];

/// Jellyfin HTTP API client.
pub struct JellyfinClient {
  http: Client,
  server_url: String,
  device_name: String,
  device_id: String,
  state: Arc<RwLock<ClientState>>,
}

/// Current credentials.
#[derive(Default)]
struct ClientState {
  access_token: Option<String>,
  user_id: Option<String>,
}

impl JellyfinClient {
  /// Create a client for one server and device identity.
  pub fn new(server_url: &str, device_name: &str, device_id: &str) -> Result<Self, JellyfinError> {
    let server_url = server_url.trim().trim_end_matches('/').to_string();
    if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
      return Err(JellyfinError::InvalidUrl(
        "URL must start with http:// or https://".to_string(),
      ));
    }

    let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

    Ok(Self {
      http,
      server_url,
      device_name: device_name.to_string(),
      device_id: device_id.to_string(),
      state: Arc::new(RwLock::new(ClientState::default())),
    })
  }

  /// Build authorization header value.
  fn auth_header(&self, token: Option<&str>) -> String {
    let mut header = format!(
      r#"MediaBrowser Client="{}", Device="{}", DeviceId="{}", Version="{}""#,
      self.device_name, self.device_name, self.device_id, CLIENT_VERSION
    );
    if let Some(token) = token {
      header.push_str(&format!(r#", Token="{}""#, token));
    }
    header
  }

  /// Authenticate with username and password. The token is kept for later calls.
  pub async fn authenticate(&self, username: &str, password: &str) -> Result<AuthResponse, JellyfinError> {
    let url = format!("{}/Users/AuthenticateByName", self.server_url);

    let body = serde_json::json!({
      "Username": username,
      "Pw": password
    });

    let response = self
      .http
      .post(&url)
      .header(header::CONTENT_TYPE, "application/json")
      .header("X-Emby-Authorization", self.auth_header(None))
      .json(&body)
      .send()
      .await?;

    if !response.status().is_success() {
      let status = response.status();
      let text = response.text().await.unwrap_or_default();
      return Err(JellyfinError::AuthFailed(format!(
        "HTTP {}: {}",
        status, text
      )));
    }

    let auth: AuthResponse = response.json().await?;
    log::info!("Authenticated as {} ({})", auth.user.name, auth.user.id);

    self.restore(&auth.access_token, &auth.user.id);
    Ok(auth)
  }

  /// Use a previously issued token without contacting the server.
  pub fn restore(&self, access_token: &str, user_id: &str) {
    let mut state = self.state.write();
    state.access_token = Some(access_token.to_string());
    state.user_id = Some(user_id.to_string());
  }

  /// Current token and user id, if authenticated.
  #[cfg(test)]
  pub(crate) fn credentials(&self) -> Option<(String, String)> {
    let state = self.state.read();
    Some((state.access_token.clone()?, state.user_id.clone()?))
  }

  /// Get access token or error if not connected.
  fn access_token(&self) -> Result<String, JellyfinError> {
    self
      .state
      .read()
      .access_token
      .clone()
      .ok_or(JellyfinError::NotConnected)
  }

  /// Get user ID or error if not connected.
  pub fn user_id(&self) -> Result<String, JellyfinError> {
    self
      .state
      .read()
      .user_id
      .clone()
      .ok_or(JellyfinError::NotConnected)
  }

  /// Start an authenticated request.
  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, JellyfinError> {
    let token = self.access_token()?;
    Ok(
      self
        .http
        .request(method, format!("{}{}", self.server_url, path))
        .header("X-Emby-Authorization", self.auth_header(Some(&token)))
        .header("X-Emby-Token", token),
    )
  }

  /// Turn a non-success status into an error.
  async fn check(path: &str, response: Response) -> Result<Response, JellyfinError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
      return Err(JellyfinError::Unauthorized);
    }
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(JellyfinError::HttpError(format!(
        "{} returned HTTP {} - {}",
        path, status, body
      )));
    }
    Ok(response)
  }

  /// Make an authenticated GET request.
  pub async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, JellyfinError> {
    let response = self.request(Method::GET, path)?.send().await?;
    Ok(Self::check(path, response).await?.json().await?)
  }

  /// Make an authenticated POST request without expecting a response body.
  pub async fn post_empty<B: serde::Serialize + std::fmt::Debug>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<(), JellyfinError> {
    log::debug!("POST {} with body: {:?}", path, body);

    let response = self
      .request(Method::POST, path)?
      .header(header::CONTENT_TYPE, "application/json")
      .json(body)
      .send()
      .await?;

    Self::check(path, response).await?;
    Ok(())
  }

  /// Cheap authenticated call used to tell "server down" from "token rejected".
  pub async fn ping(&self, timeout: Duration) -> Result<(), JellyfinError> {
    let path = "/System/Info";
    let response = self
      .request(Method::GET, path)?
      .timeout(timeout)
      .send()
      .await?;
    Self::check(path, response).await?;
    Ok(())
  }

  /// Get media item by ID.
  pub async fn get_item(&self, item_id: &str) -> Result<MediaItem, JellyfinError> {
    let user_id = self.user_id()?;
    self
      .get(&format!("/Users/{}/Items/{}", user_id, item_id))
      .await
  }

  /// List the episodes of a series, restricted to one season when given.
  pub async fn get_season_episodes(
    &self,
    series_id: &str,
    season_id: Option<&str>,
  ) -> Result<Vec<MediaItem>, JellyfinError> {
    let user_id = self.user_id()?;
    let mut path = format!(
      "/Shows/{}/Episodes?userId={}&fields=Path,IndexNumber,ParentIndexNumber,SeriesName,Name",
      series_id, user_id
    );
    if let Some(season_id) = season_id {
      path.push_str(&format!("&seasonId={}", season_id));
    }

    let response: EpisodesResponse = self.get(&path).await?;
    log::debug!(
      "Series {} has {} episodes in this listing",
      series_id,
      response.items.len()
    );
    Ok(response.items)
  }

  /// Direct-play stream URL for an item. Carries the token; redact before logging.
  pub fn stream_url(&self, item_id: &str) -> Result<String, JellyfinError> {
    Ok(format!(
      "{}/Videos/{}/stream?static=true&api_key={}",
      self.server_url,
      item_id,
      self.access_token()?
    ))
  }

  /// Get WebSocket URL for session.
  pub fn websocket_url(&self) -> Result<String, JellyfinError> {
    let token = self.access_token()?;

    // Convert http(s) to ws(s)
    let ws_url = if let Some(rest) = self.server_url.strip_prefix("https://") {
      format!("wss://{}", rest)
    } else {
      self.server_url.replacen("http://", "ws://", 1)
    };

    Ok(format!(
      "{}/socket?api_key={}&deviceId={}",
      ws_url, token, self.device_id
    ))
  }

  /// Report playback started.
  pub async fn report_playback_start(&self, info: &PlaybackStartInfo) -> Result<(), JellyfinError> {
    self.post_empty("/Sessions/Playing", info).await
  }

  /// Report playback progress.
  pub async fn report_playback_progress(
    &self,
    info: &PlaybackProgressInfo,
  ) -> Result<(), JellyfinError> {
    self.post_empty("/Sessions/Playing/Progress", info).await
  }

  /// Report playback stopped.
  pub async fn report_playback_stop(&self, info: &PlaybackStopInfo) -> Result<(), JellyfinError> {
    self.post_empty("/Sessions/Playing/Stopped", info).await
  }

  /// Mark an item as fully watched.
  pub async fn mark_played(&self, item_id: &str) -> Result<(), JellyfinError> {
    let user_id = self.user_id()?;
    self
      .post_empty(
        &format!("/Users/{}/PlayedItems/{}", user_id, item_id),
        &serde_json::json!({}),
      )
      .await
  }

  /// Capabilities that make this device show up as a cast target.
  pub fn capabilities() -> serde_json::Value {
    serde_json::json!({
      "PlayableMediaTypes": ["Audio", "Video"],
      "SupportedCommands": SUPPORTED_COMMANDS,
      "SupportsMediaControl": true,
      "SupportsPersistentIdentifier": true,
      "SupportsSync": false,
      "SupportsContentUploading": false,
      "SupportsRemoteControl": true,
    })
  }

  /// Report session capabilities to Jellyfin.
  pub async fn report_capabilities(&self) -> Result<(), JellyfinError> {
    self
      .post_empty("/Sessions/Capabilities/Full", &Self::capabilities())
      .await
  }
}

/// Redact sensitive query parameters from URLs for logging.
/// Replaces api_key=XXX with api_key=[REDACTED].
pub fn redact_url(url: &str) -> String {
  if let Some(idx) = url.find("api_key=") {
    let start = idx + "api_key=".len();
    let end = url[start..].find('&').map(|i| start + i).unwrap_or(url.len());
    format!("{}[REDACTED]{}", &url[..start], &url[end..])
  } else {
    url.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client(server: &MockServer) -> JellyfinClient {
    JellyfinClient::new(&server.uri(), "Test Shim", "mpv-test").unwrap()
  }

  #[tokio::test]
  async fn test_authenticate_stores_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/Users/AuthenticateByName"))
      .and(body_json(serde_json::json!({ "Username": "alice", "Pw": "pw" })))
      .and(header_exists("X-Emby-Authorization"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "User": { "Id": "u1", "Name": "alice" },
        "AccessToken": "tok",
        "ServerId": "srv"
      })))
      .mount(&server)
      .await;

    let client = client(&server);
    assert!(client.credentials().is_none());

    let auth = client.authenticate("alice", "pw").await.unwrap();
    assert_eq!(auth.access_token, "tok");
    assert_eq!(client.credentials(), Some(("tok".to_string(), "u1".to_string())));
  }

  #[tokio::test]
  async fn test_authenticate_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/Users/AuthenticateByName"))
      .respond_with(ResponseTemplate::new(401))
      .mount(&server)
      .await;

    let result = client(&server).authenticate("alice", "wrong").await;
    assert!(matches!(result, Err(JellyfinError::AuthFailed(_))));
  }

  #[tokio::test]
  async fn test_ping_distinguishes_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/System/Info"))
      .and(header("X-Emby-Token", "stale"))
      .respond_with(ResponseTemplate::new(401))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/System/Info"))
      .and(header("X-Emby-Token", "fresh"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
      .mount(&server)
      .await;

    let client = client(&server);
    client.restore("stale", "u1");
    let err = client.ping(Duration::from_secs(3)).await.unwrap_err();
    assert!(err.is_unauthorized());

    client.restore("fresh", "u1");
    assert!(client.ping(Duration::from_secs(3)).await.is_ok());
  }

  #[tokio::test]
  async fn test_ping_server_error_is_not_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/System/Info"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let client = client(&server);
    client.restore("tok", "u1");
    let err = client.ping(Duration::from_secs(3)).await.unwrap_err();
    assert!(!err.is_unauthorized());
  }

  #[tokio::test]
  async fn test_season_episodes_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/Shows/series1/Episodes"))
      .and(query_param("seasonId", "season1"))
      .and(query_param("userId", "u1"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "Items": [
          { "Id": "e1", "Name": "One", "Type": "Episode", "IndexNumber": 1 },
          { "Id": "e2", "Name": "Two", "Type": "Episode", "IndexNumber": 2 }
        ],
        "TotalRecordCount": 2
      })))
      .mount(&server)
      .await;

    let client = client(&server);
    client.restore("tok", "u1");
    let episodes = client.get_season_episodes("series1", Some("season1")).await.unwrap();
    let ids: Vec<_> = episodes.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e2"]);
  }

  #[tokio::test]
  async fn test_mark_played_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/Users/u1/PlayedItems/item9"))
      .and(header("X-Emby-Token", "tok"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    let client = client(&server);
    client.restore("tok", "u1");
    client.mark_played("item9").await.unwrap();
  }

  #[tokio::test]
  async fn test_calls_without_token_fail_fast() {
    let server = MockServer::start().await;
    let client = client(&server);
    assert!(matches!(client.get_item("x").await, Err(JellyfinError::NotConnected)));
    assert!(matches!(client.stream_url("x"), Err(JellyfinError::NotConnected)));
  }

  #[test]
  fn test_urls() {
    let client = JellyfinClient::new("https://media.example/", "Shim", "mpv-shim").unwrap();
    client.restore("secret", "u1");

    assert_eq!(
      client.websocket_url().unwrap(),
      "wss://media.example/socket?api_key=secret&deviceId=mpv-shim"
    );
    let url = client.stream_url("abc").unwrap();
    assert_eq!(url, "https://media.example/Videos/abc/stream?static=true&api_key=secret");
    assert_eq!(
      redact_url(&url),
      "https://media.example/Videos/abc/stream?static=true&api_key=[REDACTED]"
    );
  }

  #[test]
  fn test_invalid_server_url() {
    assert!(matches!(
      JellyfinClient::new("media.example", "Shim", "id"),
      Err(JellyfinError::InvalidUrl(_))
    ));
  }
}
