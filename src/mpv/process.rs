//! MPV process detection and spawning.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("MPV executable not found")]
  NotFound,
  #[error("Failed to spawn MPV: {0}")]
  SpawnFailed(#[from] std::io::Error),
}

/// Default IPC socket/pipe path for MPV.
pub fn default_ipc_path() -> String {
  #[cfg(windows)]
  {
    r"\\.\pipe\jellyfin-mpv-shim".to_string()
  }
  #[cfg(not(windows))]
  {
    std::env::temp_dir()
      .join("jellyfin-mpv-shim.sock")
      .to_string_lossy()
      .into_owned()
  }
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  // Check PATH first
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(windows)]
  {
    let common_paths = [
      r"C:\Program Files\mpv\mpv.exe",
      r"C:\Program Files (x86)\mpv\mpv.exe",
      r"C:\mpv\mpv.exe",
    ];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  #[cfg(target_os = "macos")]
  {
    let common_paths = [
      "/usr/local/bin/mpv",
      "/opt/homebrew/bin/mpv",
      "/Applications/mpv.app/Contents/MacOS/mpv",
    ];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  #[cfg(target_os = "linux")]
  {
    let common_paths = ["/usr/bin/mpv", "/usr/local/bin/mpv"];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  None
}

/// Command-line arguments for a playback session.
///
/// MPV starts idle and waits for `loadfile` over IPC. Resume positions are owned by
/// the shim, so MPV's own watch-later files stay off.
pub fn mpv_args(ipc_path: &str, title: &str, extra_args: &[String]) -> Vec<String> {
  let mut args = vec![
    "--idle=yes".to_string(),
    "--force-window=immediate".to_string(),
    format!("--title={}", title),
    "--keep-open=no".to_string(),
    format!("--input-ipc-server={}", ipc_path),
    "--save-position-on-quit=no".to_string(),
    "--hwdec=auto-safe".to_string(),
    "--cache=yes".to_string(),
    "--demuxer-max-bytes=150M".to_string(),
    "--demuxer-max-back-bytes=75M".to_string(),
    "--no-terminal".to_string(),
  ];
  args.extend(extra_args.iter().cloned());
  args
}

/// How often the exit watcher checks on the child.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A running MPV process.
///
/// The child is shared with a watcher task that reports its exit. Killing goes
/// through the same handle and reaps the process before returning.
#[derive(Debug)]
pub struct MpvProcess {
  pid: u32,
  child: Arc<Mutex<Child>>,
  alive: Arc<AtomicBool>,
}

impl MpvProcess {
  pub fn pid(&self) -> u32 {
    self.pid
  }

  /// True until the process has exited.
  pub fn is_alive(&self) -> bool {
    self.alive.load(Ordering::SeqCst)
  }

  /// Kill the process and wait for it to be gone.
  pub fn kill(&self) {
    let mut child = self.child.lock();
    if let Ok(Some(_)) = child.try_wait() {
      self.alive.store(false, Ordering::SeqCst);
      return;
    }

    log::info!("Killing MPV process (pid: {})", self.pid);
    if let Err(e) = child.kill() {
      log::error!("kill() failed: {}", e);
    }
    match child.wait() {
      Ok(status) => log::info!("MPV process exited with: {}", status),
      Err(e) => log::error!("wait() failed: {}", e),
    }
    self.alive.store(false, Ordering::SeqCst);
  }
}

impl Drop for MpvProcess {
  fn drop(&mut self) {
    self.kill();
  }
}

/// Spawn MPV with the IPC server enabled.
///
/// `on_exit` runs once the process is gone, whether it quit by itself or was
/// killed, with the exit code if there was one.
pub fn spawn_mpv<F>(
  mpv_path: Option<&Path>,
  args: &[String],
  on_exit: F,
) -> Result<MpvProcess, ProcessError>
where
  F: FnOnce(Option<i32>) + Send + 'static,
{
  let mpv_exe = mpv_path
    .map(Path::to_path_buf)
    .or_else(find_mpv)
    .ok_or(ProcessError::NotFound)?;

  log::info!("Spawning MPV: {:?}", mpv_exe);
  log::debug!("MPV args: {:?}", args);

  let child = Command::new(&mpv_exe)
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn()?;

  let pid = child.id();
  let child = Arc::new(Mutex::new(child));
  let alive = Arc::new(AtomicBool::new(true));

  let watched = child.clone();
  let watcher_alive = alive.clone();
  tokio::spawn(async move {
    let mut poll = tokio::time::interval(EXIT_POLL_INTERVAL);
    let status = loop {
      poll.tick().await;
      match watched.lock().try_wait() {
        Ok(Some(status)) => break Ok(status),
        Ok(None) => {}
        Err(e) => break Err(e),
      }
    };

    watcher_alive.store(false, Ordering::SeqCst);
    let code = match status {
      Ok(status) => {
        log::info!("MPV process {} exited with: {}", pid, status);
        status.code()
      }
      Err(e) => {
        log::error!("wait() failed: {}", e);
        None
      }
    };
    on_exit(code);
  });

  log::info!("MPV started with pid {}", pid);
  Ok(MpvProcess { pid, child, alive })
}

/// Remove a stale socket left behind by a previous MPV.
pub fn cleanup_ipc(path: &str) {
  #[cfg(not(windows))]
  {
    let _ = std::fs::remove_file(path);
  }
  // Windows named pipes are cleaned up automatically
  #[cfg(windows)]
  {
    let _ = path;
  }
}
