//! MPV process detection and spawning.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("MPV executable not found")]
  NotFound,
  #[error("Failed to spawn MPV: {0}")]
  SpawnFailed(#[from] std::io::Error),
}

/// Starts the player so that it listens on an IPC socket.
pub trait Launcher: Send + Sync {
  /// Start the player listening on `socket_path`. Must not wait for it to
  /// accept connections.
  fn launch(&self, socket_path: &Path) -> Result<(), ProcessError>;

  /// Stop whatever `launch` started.
  fn terminate(&self) {}
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  // Check PATH first
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(windows)]
  let common_paths: &[&str] = &[
    r"C:\Program Files\mpv\mpv.exe",
    r"C:\Program Files (x86)\mpv\mpv.exe",
  ];
  #[cfg(target_os = "macos")]
  let common_paths: &[&str] = &["/opt/homebrew/bin/mpv", "/Applications/mpv.app/Contents/MacOS/mpv"];
  #[cfg(not(any(windows, target_os = "macos")))]
  let common_paths: &[&str] = &["/usr/bin/mpv", "/usr/local/bin/mpv"];

  common_paths.iter().map(PathBuf::from).find(|p| p.exists())
}

/// Remove a leftover socket file so a stale endpoint is not mistaken for a
/// live player.
pub fn cleanup_ipc(socket_path: &Path) {
  #[cfg(not(windows))]
  {
    if let Err(e) = std::fs::remove_file(socket_path) {
      if e.kind() != std::io::ErrorKind::NotFound {
        log::warn!("Could not remove IPC socket {:?}: {}", socket_path, e);
      }
    }
  }
  // Windows named pipes are cleaned up automatically
  #[cfg(windows)]
  let _ = socket_path;
}

/// Spawns a real MPV binary in idle mode with its standard streams discarded.
pub struct MpvProcess {
  mpv_path: Option<PathBuf>,
  extra_args: Vec<String>,
  child: Mutex<Option<Child>>,
  socket_path: Mutex<Option<PathBuf>>,
}

impl MpvProcess {
  pub fn new(mpv_path: Option<PathBuf>, extra_args: Vec<String>) -> Self {
    Self {
      mpv_path,
      extra_args,
      child: Mutex::new(None),
      socket_path: Mutex::new(None),
    }
  }

  fn command(&self, mpv_exe: &Path, socket_path: &Path) -> Command {
    let mut cmd = Command::new(mpv_exe);
    cmd
      .arg(format!("--input-ipc-server={}", socket_path.display()))
      .arg("--idle")
      .arg("--no-terminal")
      .args(&self.extra_args)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null());
    cmd
  }
}

impl Launcher for MpvProcess {
  fn launch(&self, socket_path: &Path) -> Result<(), ProcessError> {
    let mpv_exe = self
      .mpv_path
      .clone()
      .or_else(find_mpv)
      .ok_or(ProcessError::NotFound)?;

    cleanup_ipc(socket_path);

    log::info!("Spawning MPV: {:?} with IPC: {:?}", mpv_exe, socket_path);
    if !self.extra_args.is_empty() {
      log::info!("Extra MPV args: {:?}", self.extra_args);
    }

    let child = self.command(&mpv_exe, socket_path).spawn()?;
    log::debug!("MPV started (pid: {})", child.id());

    // a relaunch replaces the previous process
    if let Some(mut old) = self.child.lock().replace(child) {
      let _ = old.kill();
      let _ = old.wait();
    }
    *self.socket_path.lock() = Some(socket_path.to_path_buf());
    Ok(())
  }

  fn terminate(&self) {
    if let Some(mut child) = self.child.lock().take() {
      let pid = child.id();
      match child.kill() {
        Ok(_) => log::info!("Killed MPV process (pid: {})", pid),
        Err(e) => log::error!("kill() failed: {}", e),
      }
      match child.wait() {
        Ok(status) => log::info!("MPV process exited with: {}", status),
        Err(e) => log::error!("wait() failed: {}", e),
      }
    } else {
      log::debug!("No MPV process to terminate");
    }

    if let Some(path) = self.socket_path.lock().take() {
      cleanup_ipc(&path);
    }
  }
}

impl Drop for MpvProcess {
  fn drop(&mut self) {
    self.terminate();
  }
}
