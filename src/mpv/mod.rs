//! MPV IPC module - spawns and controls external MPV player via JSON IPC.
//!
//! Architecture:
//! - `process.rs` - MPV binary detection and process spawning
//! - `ipc.rs` - Async IPC connection (Named Pipes on Windows, Unix Sockets on Linux/macOS)
//! - `protocol.rs` - JSON command/response types and serialization
//! - `client.rs` - Player trait and the process-backed MPV client

mod client;
mod ipc;
mod process;
mod protocol;

pub use client::{MpvClient, MpvError, MpvSettings, Player, PlayerSignal, SignalSink};
pub use ipc::{IpcError, MpvLineCodec};
pub use process::{default_ipc_path, find_mpv, ProcessError};
pub use protocol::{MpvCommand, PlayerEvent, MSG_NEXT, MSG_PREV, OBSERVED_PROPERTIES};
