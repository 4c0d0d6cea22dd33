//! Async IPC connection to MPV.
//!
//! Handles platform-specific socket/pipe connections. Requests are fire-and-forget:
//! the reader only logs failed responses and forwards events.

use bytes::BytesMut;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, FramedRead};

use super::protocol::{MpvCommand, MpvMessage, PlayerEvent};

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(String),
  #[error("Failed to serialize command: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("Disconnected")]
  Disconnected,
}

/// Splits the MPV byte stream into newline-delimited JSON messages.
///
/// A partial trailing line stays buffered until the rest of it arrives. Lines that
/// do not parse are dropped on their own, so the next complete line is unaffected.
#[derive(Debug, Default)]
pub struct MpvLineCodec {
  /// Offset up to which the buffer is known to contain no newline.
  next_index: usize,
}

impl Decoder for MpvLineCodec {
  type Item = MpvMessage;
  type Error = std::io::Error;

  fn decode(&mut self, src: &mut BytesMut) -> Result<Option<MpvMessage>, std::io::Error> {
    loop {
      let newline = src[self.next_index..].iter().position(|b| *b == b'\n');
      let Some(offset) = newline else {
        self.next_index = src.len();
        return Ok(None);
      };

      let line = src.split_to(self.next_index + offset + 1);
      self.next_index = 0;

      let text = String::from_utf8_lossy(&line[..line.len() - 1]);
      let trimmed = text.trim();
      if trimmed.is_empty() {
        continue;
      }

      match MpvMessage::parse(trimmed) {
        Ok(message) => return Ok(Some(message)),
        Err(e) => log::debug!("Discarding malformed MPV line: {} - {}", e, trimmed),
      }
    }
  }

  fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<MpvMessage>, std::io::Error> {
    let message = self.decode(src)?;
    if message.is_none() && !src.is_empty() {
      log::debug!("Dropping {} bytes of unterminated MPV output", src.len());
      src.clear();
      self.next_index = 0;
    }
    Ok(message)
  }
}

/// Writer channel message.
enum WriteMessage {
  Command(Vec<u8>),
  Close,
}

/// MPV IPC connection.
pub struct MpvIpc {
  write_tx: async_channel::Sender<WriteMessage>,
  reader_handle: JoinHandle<()>,
  writer_handle: JoinHandle<()>,
}

impl MpvIpc {
  /// Make a single connection attempt to the MPV IPC socket/pipe.
  ///
  /// `on_event` is called from the reader task for every event the shim cares about.
  pub async fn connect<F>(path: &str, on_event: F) -> Result<Self, IpcError>
  where
    F: FnMut(PlayerEvent) + Send + 'static,
  {
    let (reader, writer) = Self::open(path).await?;
    Ok(Self::setup(reader, writer, on_event))
  }

  #[cfg(windows)]
  async fn open(
    path: &str,
  ) -> Result<
    (
      impl tokio::io::AsyncRead + Send + Unpin + 'static,
      impl tokio::io::AsyncWrite + Send + Unpin + 'static,
    ),
    IpcError,
  > {
    use tokio::net::windows::named_pipe::ClientOptions;

    let client = ClientOptions::new()
      .open(path)
      .map_err(|e| IpcError::ConnectionFailed(format!("Failed to open pipe: {}", e)))?;

    Ok(tokio::io::split(client))
  }

  #[cfg(not(windows))]
  async fn open(
    path: &str,
  ) -> Result<
    (
      impl tokio::io::AsyncRead + Send + Unpin + 'static,
      impl tokio::io::AsyncWrite + Send + Unpin + 'static,
    ),
    IpcError,
  > {
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(path)
      .await
      .map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;

    Ok(tokio::io::split(stream))
  }

  fn setup<R, W, F>(reader: R, writer: W, on_event: F) -> Self
  where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
    W: tokio::io::AsyncWrite + Send + Unpin + 'static,
    F: FnMut(PlayerEvent) + Send + 'static,
  {
    let (write_tx, write_rx) = async_channel::unbounded::<WriteMessage>();

    let reader_handle = tokio::spawn(async move {
      Self::reader_loop(reader, on_event).await;
    });

    let writer_handle = tokio::spawn(async move {
      Self::writer_loop(writer, write_rx).await;
    });

    Self {
      write_tx,
      reader_handle,
      writer_handle,
    }
  }

  async fn reader_loop<R, F>(reader: R, mut on_event: F)
  where
    R: tokio::io::AsyncRead + Unpin,
    F: FnMut(PlayerEvent),
  {
    log::debug!("MPV IPC reader loop started");
    let mut frames = FramedRead::new(reader, MpvLineCodec::default());

    while let Some(frame) = frames.next().await {
      match frame {
        Ok(MpvMessage::Response(response)) => {
          if !response.is_success() {
            log::warn!(
              "MPV command failed: request_id={} error={}",
              response.request_id,
              response.error
            );
          }
        }
        Ok(MpvMessage::Event(event)) => {
          if let Some(player_event) = PlayerEvent::from_mpv(&event) {
            on_event(player_event);
          } else {
            log::trace!("Ignoring MPV event {}", event.event);
          }
        }
        Err(e) => {
          log::error!("MPV IPC read error: {}", e);
          break;
        }
      }
    }

    log::info!("MPV IPC connection closed");
  }

  async fn writer_loop<W: tokio::io::AsyncWrite + Unpin>(
    mut writer: W,
    write_rx: async_channel::Receiver<WriteMessage>,
  ) {
    log::debug!("MPV IPC writer loop started");

    while let Ok(msg) = write_rx.recv().await {
      match msg {
        WriteMessage::Command(mut data) => {
          data.push(b'\n');
          if let Err(e) = writer.write_all(&data).await {
            log::error!("MPV IPC write error: {}", e);
            break;
          }
          if let Err(e) = writer.flush().await {
            log::error!("MPV IPC flush error: {}", e);
            break;
          }
        }
        WriteMessage::Close => {
          log::debug!("MPV IPC writer closing");
          let _ = writer.shutdown().await;
          break;
        }
      }
    }
  }

  /// Queue a command for the writer task.
  ///
  /// The request ID was already consumed when `cmd` was built, so a failure here
  /// never causes an ID to be reused.
  pub fn send(&self, cmd: &MpvCommand) -> Result<(), IpcError> {
    let json = serde_json::to_vec(cmd)?;
    log::debug!("Sending MPV command {} (request_id={})", cmd.name(), cmd.request_id);
    self
      .write_tx
      .try_send(WriteMessage::Command(json))
      .map_err(|_| IpcError::Disconnected)
  }

  /// Close the connection.
  pub fn close(&self) {
    let _ = self.write_tx.try_send(WriteMessage::Close);
    self.reader_handle.abort();
  }
}

impl Drop for MpvIpc {
  fn drop(&mut self) {
    self.write_tx.close();
    self.reader_handle.abort();
    self.writer_handle.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mpv::protocol::MpvEvent;

  fn as_event(message: MpvMessage) -> MpvEvent {
    match message {
      MpvMessage::Event(e) => e,
      other => panic!("Expected event, got {:?}", other),
    }
  }

  #[test]
  fn test_malformed_line_does_not_poison_next_line() {
    let mut codec = MpvLineCodec::default();
    let mut buf = BytesMut::from(
      &b"{\"event\":\"file-lo\n{\"event\":\"property-change\",\"name\":\"time-pos\",\"data\":3.0}\n"[..],
    );

    let first = codec.decode(&mut buf).unwrap().expect("a message");
    let first = as_event(first);
    assert_eq!(first.name.as_deref(), Some("time-pos"));
    assert!(codec.decode(&mut buf).unwrap().is_none());
    assert!(buf.is_empty());
  }

  #[test]
  fn test_partial_line_is_kept_across_reads() {
    let mut codec = MpvLineCodec::default();
    let mut buf = BytesMut::from(&b"{\"event\":\"file-"[..]);
    assert!(codec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(b"loaded\"}\n{\"error\":\"success\",\"request_id\":7}\n{\"ev");
    let loaded = as_event(codec.decode(&mut buf).unwrap().unwrap());
    assert_eq!(loaded.event, "file-loaded");

    match codec.decode(&mut buf).unwrap().unwrap() {
      MpvMessage::Response(r) => assert_eq!(r.request_id, 7),
      other => panic!("Expected response, got {:?}", other),
    }
    assert!(codec.decode(&mut buf).unwrap().is_none());
    assert_eq!(&buf[..], b"{\"ev");
  }

  #[test]
  fn test_blank_lines_are_skipped() {
    let mut codec = MpvLineCodec::default();
    let mut buf = BytesMut::from(&b"\n\r\n{\"event\":\"idle\"}\n"[..]);
    let idle = as_event(codec.decode(&mut buf).unwrap().unwrap());
    assert_eq!(idle.event, "idle");
  }

  #[test]
  fn test_unterminated_tail_dropped_at_eof() {
    let mut codec = MpvLineCodec::default();
    let mut buf = BytesMut::from(&b"{\"event\":\"idle\""[..]);
    assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    assert!(buf.is_empty());
  }

  #[tokio::test]
  async fn test_reader_forwards_events_and_writer_appends_newline() {
    let (client, mut server) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(client);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let ipc = MpvIpc::setup(reader, writer, move |event| {
      let _ = tx.send(event);
    });

    server
      .write_all(b"garbage\n{\"event\":\"property-change\",\"name\":\"pause\",\"data\":true}\n")
      .await
      .unwrap();
    assert_eq!(rx.recv().await, Some(PlayerEvent::Paused(true)));

    let cmd = MpvCommand::set_pause(false);
    ipc.send(&cmd).unwrap();

    let mut received = Vec::new();
    let mut byte = [0u8; 1];
    use tokio::io::AsyncReadExt;
    loop {
      server.read_exact(&mut byte).await.unwrap();
      if byte[0] == b'\n' {
        break;
      }
      received.push(byte[0]);
    }
    let value: serde_json::Value = serde_json::from_slice(&received).unwrap();
    assert_eq!(value["command"][0], "set_property");
    assert_eq!(value["request_id"], cmd.request_id);
  }
}
