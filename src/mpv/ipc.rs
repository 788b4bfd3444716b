//! IPC connection to MPV.
//!
//! One stream, one reader task, one writer task. Commands are written in the
//! order they are queued and each queues a resolver for its reply; the reader
//! hands every reply to the oldest queued resolver. Events go to an inbox that
//! callers drain at their own pace.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::inbox::Inbox;
use super::protocol::{MpvCommand, MpvMessage, ProtocolError};
use crate::promise::{Promise, Resolver};

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(#[source] std::io::Error),
  #[error("IPC loop is not running")]
  NotRunning,
  #[error(transparent)]
  Protocol(#[from] ProtocolError),
}

/// Lifecycle of the connection to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  NotStarted,
  Connecting,
  Connected,
  Disconnected,
}

/// Reassembles newline-terminated lines from arbitrary read chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
  partial: Vec<u8>,
}

impl LineBuffer {
  /// Append a chunk and return every line it completed, without terminators.
  pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
    self.partial.extend_from_slice(chunk);
    let Some(last) = self.partial.iter().rposition(|b| *b == b'\n') else {
      return Vec::new();
    };

    let rest = self.partial.split_off(last + 1);
    let complete = std::mem::replace(&mut self.partial, rest);
    complete[..last]
      .split(|b| *b == b'\n')
      .map(<[u8]>::to_vec)
      .collect()
  }

  /// Bytes received since the last newline.
  pub fn partial(&self) -> &[u8] {
    &self.partial
  }

  pub fn clear(&mut self) {
    self.partial.clear();
  }
}

type PendingReply = Resolver<Value>;

/// Routes decoded lines to pending replies or the event inbox.
struct Dispatcher {
  pending: Receiver<PendingReply>,
  events: Arc<Inbox<Value>>,
}

impl Dispatcher {
  fn dispatch(&self, line: &[u8]) {
    if line.iter().all(u8::is_ascii_whitespace) {
      return;
    }

    let value: Value = match serde_json::from_slice(line) {
      Ok(value) => value,
      Err(e) => {
        log::warn!(
          "Failed to parse MPV message: {} - {}",
          e,
          String::from_utf8_lossy(line)
        );
        return;
      }
    };

    match MpvMessage::classify(value) {
      Some(MpvMessage::Reply(reply)) => match self.pending.try_recv() {
        Ok(resolver) => {
          log::debug!("MPV reply: {}", reply);
          if let Err(e) = resolver.fulfill(reply) {
            log::warn!("Could not deliver MPV reply: {}", e);
          }
        }
        Err(_) => log::debug!("Dropping MPV reply with no pending command: {}", reply),
      },
      Some(MpvMessage::Event(event)) => {
        log::debug!("MPV event: {}", event);
        self.events.push(event);
      }
      None => log::debug!("Ignoring MPV message: {}", String::from_utf8_lossy(line)),
    }
  }
}

/// Sending side of a live connection.
struct Link {
  id: u64,
  write_tx: Sender<Vec<u8>>,
  pending_tx: Sender<PendingReply>,
  cancel: CancellationToken,
}

struct Shared {
  link: Mutex<Option<Link>>,
  state: Mutex<ConnectionState>,
}

impl Shared {
  /// Drop the link if it is still the one identified by `id`.
  fn detach(&self, id: u64) {
    let mut link = self.link.lock();
    if link.as_ref().is_some_and(|link| link.id == id) {
      *link = None;
      *self.state.lock() = ConnectionState::Disconnected;
      log::info!("MPV IPC disconnected");
    }
  }
}

/// MPV IPC multiplexer.
pub struct MpvIpc {
  shared: Arc<Shared>,
  events: Arc<Inbox<Value>>,
  read_buffer_size: usize,
  next_link_id: AtomicU64,
}

impl MpvIpc {
  pub fn new(read_buffer_size: usize) -> Self {
    Self {
      shared: Arc::new(Shared {
        link: Mutex::new(None),
        state: Mutex::new(ConnectionState::NotStarted),
      }),
      events: Arc::new(Inbox::new()),
      read_buffer_size: read_buffer_size.max(1),
      next_link_id: AtomicU64::new(1),
    }
  }

  pub fn state(&self) -> ConnectionState {
    *self.shared.state.lock()
  }

  pub(crate) fn set_state(&self, state: ConnectionState) {
    *self.shared.state.lock() = state;
  }

  /// Whether the reader loop is live and commands can be sent.
  pub fn is_running(&self) -> bool {
    self.shared.link.lock().is_some()
  }

  /// Take ownership of a connected stream and start the reader and writer
  /// tasks on `handle`.
  ///
  /// Returns `false` and drops `stream` if a loop is already running.
  pub fn attach<S>(&self, stream: S, handle: &Handle) -> bool
  where
    S: AsyncRead + AsyncWrite + Send + 'static,
  {
    let mut link = self.shared.link.lock();
    if link.is_some() {
      log::warn!("MPV IPC loop already running, ignoring new stream");
      return false;
    }

    let (reader, writer) = tokio::io::split(stream);
    let (write_tx, write_rx) = async_channel::unbounded();
    let (pending_tx, pending_rx) = async_channel::unbounded();
    let cancel = CancellationToken::new();
    let id = self.next_link_id.fetch_add(1, Ordering::Relaxed);

    let dispatcher = Dispatcher {
      pending: pending_rx,
      events: self.events.clone(),
    };
    handle.spawn(reader_loop(
      reader,
      dispatcher,
      cancel.clone(),
      self.shared.clone(),
      id,
      self.read_buffer_size,
    ));
    handle.spawn(writer_loop(writer, write_rx, cancel.clone()));

    *link = Some(Link {
      id,
      write_tx,
      pending_tx,
      cancel,
    });
    *self.shared.state.lock() = ConnectionState::Connected;
    log::info!("MPV IPC connected");
    true
  }

  /// Queue a command and return the promise of its reply.
  ///
  /// The resolver is queued before the bytes, under the same lock, so
  /// concurrent senders keep replies and writes in the same order.
  pub fn send_command(&self, cmd: &MpvCommand) -> Result<Promise<Value>, IpcError> {
    let line = cmd.to_line()?;

    let guard = self.shared.link.lock();
    let link = guard.as_ref().ok_or(IpcError::NotRunning)?;

    let (promise, resolver) = Promise::pair();
    link
      .pending_tx
      .try_send(resolver)
      .map_err(|_| IpcError::NotRunning)?;
    link
      .write_tx
      .try_send(line)
      .map_err(|_| IpcError::NotRunning)?;

    log::debug!("Queued MPV command: {:?}", cmd.name());
    Ok(promise)
  }

  /// Pop the oldest event. `None` if nothing arrived in time.
  pub fn get_event(&self, block: bool, timeout: Option<Duration>) -> Option<Value> {
    self.events.pop(block, timeout)
  }

  /// Number of events waiting in the inbox.
  pub fn pending_events(&self) -> usize {
    self.events.len()
  }

  /// Stop the reader loop.
  ///
  /// The link is detached at once so later commands fail with
  /// [`IpcError::NotRunning`]; the reader notices the cancellation at its
  /// next wait. Outstanding promises are left unfulfilled.
  pub fn stop(&self) {
    let mut link = self.shared.link.lock();
    match link.take() {
      Some(link) => {
        log::info!("Stopping MPV IPC loop");
        link.cancel.cancel();
        *self.shared.state.lock() = ConnectionState::Disconnected;
      }
      None => log::debug!("stop() called with no running MPV IPC loop"),
    }
  }

  /// Connect to the MPV socket, retrying while it is not accepting yet.
  ///
  /// "Connection refused" and "not found" are retried every `retry` until
  /// `timeout` has passed; any other error is returned immediately.
  #[cfg(unix)]
  pub async fn connect(
    path: &Path,
    retry: Duration,
    timeout: Duration,
  ) -> Result<tokio::net::UnixStream, IpcError> {
    use tokio::net::UnixStream;

    let deadline = tokio::time::Instant::now() + timeout;
    let mut attempt: u32 = 0;

    loop {
      attempt += 1;
      match UnixStream::connect(path).await {
        Ok(stream) => {
          log::debug!("IPC connected after {} attempt(s)", attempt);
          return Ok(stream);
        }
        Err(e) if is_transient(&e) && tokio::time::Instant::now() < deadline => {
          log::debug!("IPC connect attempt {} failed: {}", attempt, e);
          tokio::time::sleep(retry).await;
        }
        Err(e) => return Err(IpcError::ConnectionFailed(e)),
      }
    }
  }

  #[cfg(windows)]
  pub async fn connect(
    path: &Path,
    retry: Duration,
    timeout: Duration,
  ) -> Result<tokio::net::windows::named_pipe::NamedPipeClient, IpcError> {
    use tokio::net::windows::named_pipe::ClientOptions;

    // ERROR_PIPE_BUSY
    const PIPE_BUSY: i32 = 231;

    let deadline = tokio::time::Instant::now() + timeout;
    let mut attempt: u32 = 0;

    loop {
      attempt += 1;
      match ClientOptions::new().open(path) {
        Ok(client) => return Ok(client),
        Err(e)
          if (is_transient(&e) || e.raw_os_error() == Some(PIPE_BUSY))
            && tokio::time::Instant::now() < deadline =>
        {
          log::debug!("IPC connect attempt {} failed: {}", attempt, e);
          tokio::time::sleep(retry).await;
        }
        Err(e) => return Err(IpcError::ConnectionFailed(e)),
      }
    }
  }
}

impl Drop for MpvIpc {
  fn drop(&mut self) {
    self.stop();
  }
}

fn is_transient(e: &std::io::Error) -> bool {
  matches!(
    e.kind(),
    std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound
  )
}

async fn reader_loop<R: AsyncRead + Unpin>(
  mut reader: R,
  dispatcher: Dispatcher,
  cancel: CancellationToken,
  shared: Arc<Shared>,
  id: u64,
  buffer_size: usize,
) {
  log::info!("MPV IPC reader loop started");
  let mut lines = LineBuffer::default();
  let mut buf = vec![0u8; buffer_size];

  loop {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        log::info!("MPV IPC reader shutdown requested");
        break;
      }
      read = reader.read(&mut buf) => {
        match read {
          Ok(0) => {
            log::info!("MPV IPC connection closed");
            break;
          }
          Ok(n) => {
            for line in lines.push(&buf[..n]) {
              dispatcher.dispatch(&line);
            }
          }
          Err(e) => {
            log::error!("MPV IPC read error: {}", e);
            break;
          }
        }
      }
    }
  }

  lines.clear();
  shared.detach(id);
}

async fn writer_loop<W: AsyncWrite + Unpin>(
  mut writer: W,
  write_rx: Receiver<Vec<u8>>,
  cancel: CancellationToken,
) {
  while let Ok(line) = write_rx.recv().await {
    let written = match writer.write_all(&line).await {
      Ok(()) => writer.flush().await,
      Err(e) => Err(e),
    };

    if let Err(e) = written {
      log::error!("MPV IPC write error: {}", e);
      cancel.cancel();
      break;
    }
  }
  log::debug!("MPV IPC writer loop finished");
}
