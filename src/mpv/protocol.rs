//! MPV JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc
//!
//! Commands carry no request id. mpv answers in request order, so replies are
//! matched to commands purely by position.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
  #[error("Invalid log level: {0}")]
  InvalidLogLevel(String),
  #[error("Failed to encode command: {0}")]
  Encode(#[from] serde_json::Error),
}

/// Command sent to MPV via IPC.
#[derive(Debug, Clone, Serialize)]
pub struct MpvCommand {
  pub command: Vec<Value>,
}

impl MpvCommand {
  /// Create a command from its name and arguments.
  pub fn new(name: &str, args: Vec<Value>) -> Self {
    let mut command = Vec::with_capacity(args.len() + 1);
    command.push(Value::from(name));
    command.extend(args);
    Self { command }
  }

  /// Command name (first element).
  pub fn name(&self) -> Option<&str> {
    self.command.first().and_then(Value::as_str)
  }

  /// Serialize as one newline-terminated JSON line.
  pub fn to_line(&self) -> Result<Vec<u8>, ProtocolError> {
    let mut line = serde_json::to_vec(self)?;
    line.push(b'\n');
    Ok(line)
  }

  /// Load a file for playback.
  pub fn loadfile(url: &str) -> Self {
    Self::new("loadfile", vec![url.into()])
  }

  /// Seek to absolute position in seconds.
  pub fn seek(time: f64) -> Self {
    Self::new("seek", vec![time.into(), "absolute".into()])
  }

  /// Set pause state.
  pub fn set_pause(paused: bool) -> Self {
    Self::set_property("pause", paused.into())
  }

  /// Stop playback and clear the playlist.
  pub fn stop() -> Self {
    Self::new("stop", Vec::new())
  }

  /// Get a property value.
  pub fn get_property(name: &str) -> Self {
    Self::new("get_property", vec![name.into()])
  }

  /// Get a property value formatted as a string.
  pub fn get_property_string(name: &str) -> Self {
    Self::new("get_property_string", vec![name.into()])
  }

  /// Set a property value.
  pub fn set_property(name: &str, value: Value) -> Self {
    Self::new("set_property", vec![name.into(), value])
  }

  /// Set a property from its string form.
  pub fn set_property_string(name: &str, value: &str) -> Self {
    Self::new("set_property_string", vec![name.into(), value.into()])
  }

  /// Observe a property for changes.
  pub fn observe_property(id: i64, name: &str) -> Self {
    Self::new("observe_property", vec![id.into(), name.into()])
  }

  /// Stop observing a property.
  pub fn unobserve_property(id: i64) -> Self {
    Self::new("unobserve_property", vec![id.into()])
  }

  /// Enable an event by name (`"all"` enables every event).
  pub fn enable_event(name: &str) -> Self {
    Self::new("enable_event", vec![name.into()])
  }

  /// Disable an event by name (`"all"` disables every event).
  pub fn disable_event(name: &str) -> Self {
    Self::new("disable_event", vec![name.into()])
  }

  /// Subscribe to log messages at `level` and above.
  pub fn request_log_messages(level: LogLevel) -> Self {
    Self::new("request_log_messages", vec![level.as_str().into()])
  }

  /// Cycle (toggle) a property.
  pub fn cycle(property: &str) -> Self {
    Self::new("cycle", vec![property.into()])
  }

  /// Quit MPV.
  pub fn quit() -> Self {
    Self::new("quit", Vec::new())
  }
}

/// Log levels accepted by `request_log_messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  None,
  Fatal,
  Error,
  Warn,
  Info,
  V,
  Debug,
  Trace,
}

impl LogLevel {
  pub const ALL: [LogLevel; 8] = [
    LogLevel::None,
    LogLevel::Fatal,
    LogLevel::Error,
    LogLevel::Warn,
    LogLevel::Info,
    LogLevel::V,
    LogLevel::Debug,
    LogLevel::Trace,
  ];

  /// Wire name of the level.
  pub fn as_str(self) -> &'static str {
    match self {
      LogLevel::None => "none",
      LogLevel::Fatal => "fatal",
      LogLevel::Error => "error",
      LogLevel::Warn => "warn",
      LogLevel::Info => "info",
      LogLevel::V => "v",
      LogLevel::Debug => "debug",
      LogLevel::Trace => "trace",
    }
  }
}

impl FromStr for LogLevel {
  type Err = ProtocolError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    LogLevel::ALL
      .into_iter()
      .find(|level| level.as_str() == s)
      .ok_or_else(|| ProtocolError::InvalidLogLevel(s.to_string()))
  }
}

impl fmt::Display for LogLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Message received from MPV IPC, classified by its envelope keys.
#[derive(Debug, Clone, PartialEq)]
pub enum MpvMessage {
  /// Anything carrying `error`: the reply to the oldest pending command.
  Reply(Value),
  /// Anything carrying `event` (and no `error`).
  Event(Value),
}

impl MpvMessage {
  /// Classify a decoded document. Unknown shapes yield `None`.
  pub fn classify(value: Value) -> Option<Self> {
    let object = value.as_object()?;
    if object.contains_key("error") {
      Some(MpvMessage::Reply(value))
    } else if object.contains_key("event") {
      Some(MpvMessage::Event(value))
    } else {
      None
    }
  }
}

/// Typed view of a reply.
#[derive(Debug, Clone, Deserialize)]
pub struct MpvResponse {
  /// "success" or error message.
  pub error: String,
  /// Response data (command-specific).
  #[serde(default)]
  pub data: Option<Value>,
}

impl MpvResponse {
  pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
    Self::deserialize(value)
  }

  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error == "success"
  }
}

/// Typed view of an event (property changes, playback events, log messages).
#[derive(Debug, Clone, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g., "property-change", "end-file", "log-message").
  pub event: String,
  /// Observer ID for property-change events.
  pub id: Option<i64>,
  /// Property name for property-change events.
  pub name: Option<String>,
  /// Event data.
  pub data: Option<Value>,
  /// Reason for end-file events (e.g., "eof", "stop", "quit", "error").
  pub reason: Option<String>,
}

impl MpvEvent {
  pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
    Self::deserialize(value)
  }
}
