//! terebi - a promise-based interface to mpv's JSON IPC.
//!
//! [`Mpv`] launches the player on first [`Mpv::play`], connects to its IPC
//! socket and returns a [`Promise`] for every command. Replies are matched to
//! commands by arrival order; events are queued for [`Mpv::get_event`].
//!
//! ```no_run
//! use std::time::Duration;
//! use terebi::{Mpv, MpvConfig};
//!
//! let mpv = Mpv::new(MpvConfig::default())?;
//! mpv.play("video.mkv", true)?;
//! let volume = mpv.get_property("volume")?.ask(true, Some(Duration::from_secs(1)))?;
//! println!("volume: {}", volume["data"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Logging goes through the `log` facade; install any logger to see it.

mod config;
pub mod mpv;
pub mod promise;

pub use config::{default_socket_path, ConfigError, MpvConfig};
pub use mpv::{ConnectionState, LogLevel, Mpv, MpvCommand, MpvError, MpvEvent, MpvResponse};
pub use promise::{Promise, PromiseError, Resolver};
