//! MPV IPC module - controls an external MPV player via JSON IPC.
//!
//! Architecture:
//! - `process.rs` - MPV binary detection and process spawning
//! - `ipc.rs` - Stream multiplexer: line framing, reply correlation, events
//! - `inbox.rs` - Blocking event queue
//! - `protocol.rs` - JSON command/envelope types and serialization
//! - `client.rs` - High-level MPV client with command methods

mod client;
mod inbox;
mod ipc;
mod process;
mod protocol;

pub use client::{Mpv, MpvError};
pub use ipc::{ConnectionState, IpcError, LineBuffer, MpvIpc};
pub use process::{cleanup_ipc, find_mpv, Launcher, MpvProcess, ProcessError};
pub use protocol::{LogLevel, MpvCommand, MpvEvent, MpvMessage, MpvResponse, ProtocolError};
