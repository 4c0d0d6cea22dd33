//! Jellyfin side of the shim.
//!
//! Handles authentication, the remote-control socket, playback reporting and the
//! session orchestrator that ties remote commands to the player.

mod bridge;
mod client;
mod error;
mod navigation;
mod session;
mod types;
mod websocket;

pub use bridge::{resolve_item, HubBridge};
pub use client::{redact_url, JellyfinClient};
pub use error::JellyfinError;
pub use navigation::{format_title, ItemContext, SeriesContext};
pub use session::{
  Event, Hub, HubReport, Orchestrator, PlaybackState, ResolvedItem, SessionSettings,
};
pub use types::*;
pub use websocket::{
  parse_hub_message, Backoff, CommandSink, ConnectionState, ControlChannel, HubCommand,
  PlaystateCommand,
};
