//! Client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to read config: {0}")]
  Io(#[from] std::io::Error),
  #[error("Invalid config file: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Largest accepted read buffer.
const MAX_READ_BUFFER: usize = 1 << 20;

/// MPV client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpvConfig {
  /// IPC socket the player listens on.
  #[serde(default = "default_socket_path")]
  pub socket_path: PathBuf,

  /// Custom MPV executable path (None = auto-detect).
  #[serde(default)]
  pub mpv_path: Option<PathBuf>,

  /// Additional MPV command-line arguments.
  #[serde(default)]
  pub mpv_args: Vec<String>,

  /// Delay between connection attempts while the player starts.
  #[serde(default = "default_connect_retry_ms")]
  pub connect_retry_ms: u64,

  /// Give up connecting after this long.
  #[serde(default = "default_connect_timeout_ms")]
  pub connect_timeout_ms: u64,

  /// Size of a single socket read.
  #[serde(default = "default_read_buffer_size")]
  pub read_buffer_size: usize,
}

/// A socket path unique to this process and call, under the user runtime dir.
pub fn default_socket_path() -> PathBuf {
  let dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
  dir.join(format!("terebi-{}.sock", Uuid::new_v4().simple()))
}

fn default_connect_retry_ms() -> u64 {
  50
}

fn default_connect_timeout_ms() -> u64 {
  5000
}

fn default_read_buffer_size() -> usize {
  4096
}

impl Default for MpvConfig {
  fn default() -> Self {
    Self {
      socket_path: default_socket_path(),
      mpv_path: None,
      mpv_args: Vec::new(),
      connect_retry_ms: default_connect_retry_ms(),
      connect_timeout_ms: default_connect_timeout_ms(),
      read_buffer_size: default_read_buffer_size(),
    }
  }
}

impl MpvConfig {
  /// Default configuration talking over `socket_path`.
  pub fn with_socket_path(socket_path: impl Into<PathBuf>) -> Self {
    Self {
      socket_path: socket_path.into(),
      ..Self::default()
    }
  }

  /// Load and validate a JSON config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let config: Self = serde_json::from_str(&text)?;
    config.validate()?;
    log::debug!("Loaded MPV config from {:?}", path);
    Ok(config)
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.socket_path.as_os_str().is_empty() {
      return Err(ConfigError::Invalid("Socket path cannot be empty".to_string()));
    }
    if self.connect_retry_ms == 0 {
      return Err(ConfigError::Invalid(
        "Connect retry interval must be at least 1 ms".to_string(),
      ));
    }
    if self.connect_timeout_ms < self.connect_retry_ms {
      return Err(ConfigError::Invalid(
        "Connect timeout must not be shorter than the retry interval".to_string(),
      ));
    }
    if self.read_buffer_size == 0 || self.read_buffer_size > MAX_READ_BUFFER {
      return Err(ConfigError::Invalid(format!(
        "Read buffer size must be between 1 and {} bytes",
        MAX_READ_BUFFER
      )));
    }
    Ok(())
  }

  pub fn connect_retry(&self) -> Duration {
    Duration::from_millis(self.connect_retry_ms)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms)
  }
}
