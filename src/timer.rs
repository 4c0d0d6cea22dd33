//! Cancellable one-shot and periodic timers that report back as events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// The timers a playback session can have armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
  /// Periodic progress report.
  Progress,
  /// Next IPC connection attempt.
  IpcConnect,
  /// Send `loadfile` after the IPC connection settled.
  LoadFile,
}

/// Receives timer firings tagged with the generation that armed them.
pub type TimerSink = Arc<dyn Fn(u64, TimerKind) + Send + Sync>;

/// At most one running timer per kind. Arming a kind replaces its previous timer.
pub struct Timers {
  sink: TimerSink,
  handles: HashMap<TimerKind, JoinHandle<()>>,
}

impl Timers {
  pub fn new(sink: TimerSink) -> Self {
    Self {
      sink,
      handles: HashMap::new(),
    }
  }

  /// Fire once after `after`.
  pub fn once(&mut self, kind: TimerKind, generation: u64, after: Duration) {
    let sink = self.sink.clone();
    let handle = tokio::spawn(async move {
      tokio::time::sleep(after).await;
      sink(generation, kind);
    });
    self.replace(kind, handle);
  }

  /// Fire every `period`, first after one full period.
  pub fn every(&mut self, kind: TimerKind, generation: u64, period: Duration) {
    let sink = self.sink.clone();
    let handle = tokio::spawn(async move {
      let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
      loop {
        interval.tick().await;
        sink(generation, kind);
      }
    });
    self.replace(kind, handle);
  }

  fn replace(&mut self, kind: TimerKind, handle: JoinHandle<()>) {
    if let Some(old) = self.handles.insert(kind, handle) {
      old.abort();
    }
  }

  pub fn cancel_all(&mut self) {
    for (_, handle) in self.handles.drain() {
      handle.abort();
    }
  }

  /// True while a timer of this kind is waiting to fire.
  pub fn is_armed(&self, kind: TimerKind) -> bool {
    self.handles.get(&kind).is_some_and(|h| !h.is_finished())
  }
}

impl Drop for Timers {
  fn drop(&mut self) {
    self.cancel_all();
  }
}
