//! High-level MPV client with command methods.
//!
//! Every method that talks to the player returns a [`Promise`] for the reply
//! without waiting for it. The API is synchronous and must not be called
//! from inside an async task.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::{Handle, Runtime};

use super::ipc::{ConnectionState, IpcError, MpvIpc};
use super::process::{Launcher, MpvProcess, ProcessError};
use super::protocol::{LogLevel, MpvCommand};
use crate::config::{ConfigError, MpvConfig};
use crate::promise::Promise;

#[derive(Error, Debug)]
pub enum MpvError {
  #[error("Process error: {0}")]
  Process(#[from] ProcessError),
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
  #[error("Config error: {0}")]
  Config(#[from] ConfigError),
  #[error("Invalid log level: {0}")]
  InvalidLevel(String),
  #[error("No event available")]
  NoEvent,
  #[error("Failed to start IPC runtime: {0}")]
  Runtime(#[source] std::io::Error),
}

/// High-level MPV client.
pub struct Mpv {
  config: MpvConfig,
  launcher: Arc<dyn Launcher>,
  ipc: MpvIpc,
  start_lock: Mutex<()>,
  handle: Handle,
  runtime: Option<Runtime>,
}

impl Mpv {
  /// Create a client that spawns a real MPV binary on first use.
  pub fn new(config: MpvConfig) -> Result<Self, MpvError> {
    let launcher = Arc::new(MpvProcess::new(
      config.mpv_path.clone(),
      config.mpv_args.clone(),
    ));
    Self::with_launcher(config, launcher)
  }

  /// Create a client with its own IPC runtime and a custom launcher.
  pub fn with_launcher(config: MpvConfig, launcher: Arc<dyn Launcher>) -> Result<Self, MpvError> {
    config.validate()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
      .worker_threads(1)
      .thread_name("terebi-ipc")
      .enable_all()
      .build()
      .map_err(MpvError::Runtime)?;
    let handle = runtime.handle().clone();
    Ok(Self::assemble(config, launcher, handle, Some(runtime)))
  }

  /// Create a client whose IPC tasks run on an existing multi-thread runtime.
  pub fn with_handle(
    config: MpvConfig,
    launcher: Arc<dyn Launcher>,
    handle: Handle,
  ) -> Result<Self, MpvError> {
    config.validate()?;
    Ok(Self::assemble(config, launcher, handle, None))
  }

  fn assemble(
    config: MpvConfig,
    launcher: Arc<dyn Launcher>,
    handle: Handle,
    runtime: Option<Runtime>,
  ) -> Self {
    Self {
      ipc: MpvIpc::new(config.read_buffer_size),
      config,
      launcher,
      start_lock: Mutex::new(()),
      handle,
      runtime,
    }
  }

  pub fn config(&self) -> &MpvConfig {
    &self.config
  }

  pub fn state(&self) -> ConnectionState {
    self.ipc.state()
  }

  /// Whether the IPC loop is running and commands can be sent.
  pub fn is_running(&self) -> bool {
    self.ipc.is_running()
  }

  /// Launch the player and connect to its socket, unless already connected.
  pub fn start(&self) -> Result<(), MpvError> {
    let _starting = self.start_lock.lock();
    if self.ipc.is_running() {
      log::debug!("MPV IPC already running");
      return Ok(());
    }

    self.ipc.set_state(ConnectionState::Connecting);
    if let Err(e) = self.launch_and_connect() {
      log::error!("Failed to start MPV: {}", e);
      self.ipc.set_state(ConnectionState::Disconnected);
      return Err(e);
    }

    log::info!("MPV client connected");
    Ok(())
  }

  fn launch_and_connect(&self) -> Result<(), MpvError> {
    let path = &self.config.socket_path;
    self.launcher.launch(path)?;

    let stream = self.handle.block_on(MpvIpc::connect(
      path,
      self.config.connect_retry(),
      self.config.connect_timeout(),
    ))?;
    self.ipc.attach(stream, &self.handle);
    Ok(())
  }

  /// Use an already-connected stream instead of launching the player.
  ///
  /// Returns `false` if a connection is already running.
  pub fn attach<S>(&self, stream: S) -> bool
  where
    S: AsyncRead + AsyncWrite + Send + 'static,
  {
    self.ipc.attach(stream, &self.handle)
  }

  /// Stop the IPC loop. The player process keeps running.
  pub fn stop(&self) {
    self.ipc.stop();
  }

  /// Ask the player to quit, stop the IPC loop and terminate the process.
  pub fn shutdown(&self) {
    if self.ipc.is_running() {
      if let Err(e) = self.quit() {
        log::warn!("Failed to send quit: {}", e);
      }
    }
    self.ipc.stop();
    self.launcher.terminate();
    log::info!("MPV client stopped");
  }

  /// Send a command to MPV.
  pub fn send(&self, cmd: &MpvCommand) -> Result<Promise<Value>, MpvError> {
    Ok(self.ipc.send_command(cmd)?)
  }

  /// Send a command by name with arbitrary arguments.
  pub fn send_command(&self, name: &str, args: Vec<Value>) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::new(name, args))
  }

  /// Load `target` and start playing it, starting the player if needed.
  ///
  /// The returned promise is the reply to the load; the pause state is
  /// set to `!unpause` right after.
  pub fn play(&self, target: &str, unpause: bool) -> Result<Promise<Value>, MpvError> {
    if !self.ipc.is_running() {
      self.start()?;
    }
    let loaded = self.loadfile(target)?;
    self.send(&MpvCommand::set_pause(!unpause))?;
    Ok(loaded)
  }

  /// Load a file for playback.
  pub fn loadfile(&self, url: &str) -> Result<Promise<Value>, MpvError> {
    log::info!("Loading file: {}", url);
    self.send(&MpvCommand::loadfile(url))
  }

  pub fn pause(&self) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::set_pause(true))
  }

  pub fn unpause(&self) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::set_pause(false))
  }

  /// Stop playback. The player itself stays up.
  pub fn stop_playback(&self) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::stop())
  }

  /// Seek to absolute position in seconds.
  pub fn seek(&self, time: f64) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::seek(time))
  }

  /// Get a property value.
  pub fn get_property(&self, name: &str) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::get_property(name))
  }

  /// Get a property value, always formatted as a string.
  pub fn get_property_string(&self, name: &str) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::get_property_string(name))
  }

  pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::set_property(name, value.into()))
  }

  /// Set a property from its string form.
  pub fn set_property_string(&self, name: &str, value: &str) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::set_property_string(name, value))
  }

  /// Observe a property for changes.
  /// Changes arrive through [`Mpv::get_event`] with event="property-change".
  pub fn observe_property(&self, observer_id: i64, name: &str) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::observe_property(observer_id, name))
  }

  pub fn unobserve_property(&self, observer_id: i64) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::unobserve_property(observer_id))
  }

  /// Enable an event; `"all"` enables every event.
  pub fn enable_event(&self, name: &str) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::enable_event(name))
  }

  /// Disable an event; `"all"` disables every event.
  pub fn disable_event(&self, name: &str) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::disable_event(name))
  }

  /// Subscribe to log messages by level name.
  ///
  /// Nothing is sent if `level` is not one of mpv's level names.
  pub fn request_log_messages(&self, level: &str) -> Result<Promise<Value>, MpvError> {
    let level: LogLevel = level
      .parse()
      .map_err(|_| MpvError::InvalidLevel(level.to_string()))?;
    self.request_log_level(level)
  }

  pub fn request_log_level(&self, level: LogLevel) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::request_log_messages(level))
  }

  /// Cycle (toggle) a property.
  pub fn cycle(&self, property: &str) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::cycle(property))
  }

  /// Quit MPV.
  pub fn quit(&self) -> Result<Promise<Value>, MpvError> {
    self.send(&MpvCommand::quit())
  }

  /// Take the oldest event, waiting like [`Promise::ask`] does.
  pub fn get_event(&self, block: bool, timeout: Option<Duration>) -> Result<Value, MpvError> {
    self.ipc.get_event(block, timeout).ok_or(MpvError::NoEvent)
  }

  pub fn get_event_nowait(&self) -> Result<Value, MpvError> {
    self.get_event(false, None)
  }
}

impl Drop for Mpv {
  fn drop(&mut self) {
    self.ipc.stop();
    if let Some(runtime) = self.runtime.take() {
      runtime.shutdown_background();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::path::Path;
  use std::thread;
  use std::time::Instant;
  use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

  const WAIT: Option<Duration> = Some(Duration::from_secs(5));

  /// Launcher for tests that attach a stream themselves.
  struct NoLauncher;

  impl Launcher for NoLauncher {
    fn launch(&self, _socket_path: &Path) -> Result<(), ProcessError> {
      Err(ProcessError::NotFound)
    }
  }

  struct Peer {
    rt: Runtime,
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
  }

  impl Peer {
    fn read_line(&mut self) -> String {
      self.rt.block_on(self.lines.next_line()).unwrap().unwrap()
    }

    fn write(&mut self, bytes: &str) {
      let writer = &mut self.writer;
      self.rt.block_on(async {
        writer.write_all(bytes.as_bytes()).await.unwrap();
        writer.flush().await.unwrap();
      });
    }
  }

  fn attached() -> (Mpv, Peer) {
    let mpv = Mpv::with_launcher(MpvConfig::default(), Arc::new(NoLauncher)).unwrap();
    let (client, server) = tokio::io::duplex(4096);
    assert!(mpv.attach(client));
    let (read, writer) = tokio::io::split(server);
    let peer = Peer {
      rt: Runtime::new().unwrap(),
      lines: BufReader::new(read).lines(),
      writer,
    };
    (mpv, peer)
  }

  #[test]
  fn test_pause_end_to_end() {
    let (mpv, mut peer) = attached();
    let promise = mpv.pause().unwrap();
    assert_eq!(peer.read_line(), r#"{"command":["set_property","pause",true]}"#);
    peer.write("{\"error\":\"success\"}\n");
    assert_eq!(promise.ask(true, WAIT).unwrap(), json!({"error": "success"}));
  }

  #[test]
  fn test_convenience_commands_on_the_wire() {
    let (mpv, mut peer) = attached();
    let cases: Vec<(Result<Promise<Value>, MpvError>, &str)> = vec![
      (mpv.get_property("volume"), r#"{"command":["get_property","volume"]}"#),
      (
        mpv.get_property_string("volume"),
        r#"{"command":["get_property_string","volume"]}"#,
      ),
      (mpv.set_property("volume", 50), r#"{"command":["set_property","volume",50]}"#),
      (
        mpv.set_property_string("volume", "50"),
        r#"{"command":["set_property_string","volume","50"]}"#,
      ),
      (mpv.enable_event("all"), r#"{"command":["enable_event","all"]}"#),
      (mpv.disable_event("tick"), r#"{"command":["disable_event","tick"]}"#),
      (mpv.request_log_messages("v"), r#"{"command":["request_log_messages","v"]}"#),
      (mpv.loadfile("a.mkv"), r#"{"command":["loadfile","a.mkv"]}"#),
      (mpv.unpause(), r#"{"command":["set_property","pause",false]}"#),
      (mpv.stop_playback(), r#"{"command":["stop"]}"#),
      (mpv.seek(12.5), r#"{"command":["seek",12.5,"absolute"]}"#),
      (mpv.observe_property(1, "pause"), r#"{"command":["observe_property",1,"pause"]}"#),
      (mpv.unobserve_property(1), r#"{"command":["unobserve_property",1]}"#),
      (mpv.cycle("mute"), r#"{"command":["cycle","mute"]}"#),
      (
        mpv.send_command("script-message", vec![json!("hi")]),
        r#"{"command":["script-message","hi"]}"#,
      ),
    ];

    for (sent, expected) in &cases {
      assert!(sent.is_ok());
      assert_eq!(peer.read_line(), *expected);
    }
  }

  #[test]
  fn test_invalid_log_level_sends_nothing() {
    let (mpv, mut peer) = attached();
    match mpv.request_log_messages("verbose") {
      Err(MpvError::InvalidLevel(level)) => assert_eq!(level, "verbose"),
      other => panic!("Expected invalid level, got {:?}", other),
    }
    mpv.request_log_level(LogLevel::Warn).unwrap();
    assert_eq!(peer.read_line(), r#"{"command":["request_log_messages","warn"]}"#);
  }

  #[test]
  fn test_send_before_start_fails() {
    let mpv = Mpv::with_launcher(MpvConfig::default(), Arc::new(NoLauncher)).unwrap();
    assert_eq!(mpv.state(), ConnectionState::NotStarted);
    assert!(matches!(
      mpv.pause(),
      Err(MpvError::Ipc(IpcError::NotRunning))
    ));
  }

  #[test]
  fn test_failed_launch_is_reported() {
    let mpv = Mpv::with_launcher(MpvConfig::default(), Arc::new(NoLauncher)).unwrap();
    assert!(matches!(
      mpv.play("a.mkv", true),
      Err(MpvError::Process(ProcessError::NotFound))
    ));
    assert_eq!(mpv.state(), ConnectionState::Disconnected);
  }

  #[test]
  fn test_invalid_config_is_rejected() {
    let config = MpvConfig {
      read_buffer_size: 0,
      ..MpvConfig::default()
    };
    assert!(matches!(
      Mpv::with_launcher(config, Arc::new(NoLauncher)),
      Err(MpvError::Config(_))
    ));
  }

  #[test]
  fn test_events_are_polled_in_order() {
    let (mpv, mut peer) = attached();
    assert!(matches!(mpv.get_event_nowait(), Err(MpvError::NoEvent)));

    peer.write("{\"event\":\"start-file\"}\n{\"event\":\"file-loaded\"}\n");
    assert_eq!(mpv.get_event(true, WAIT).unwrap()["event"], "start-file");
    assert_eq!(mpv.get_event(true, WAIT).unwrap()["event"], "file-loaded");
    assert!(matches!(
      mpv.get_event(true, Some(Duration::from_millis(20))),
      Err(MpvError::NoEvent)
    ));
  }

  #[test]
  fn test_stop_then_send_fails() {
    let (mpv, _peer) = attached();
    mpv.stop();
    assert!(!mpv.is_running());
    assert!(matches!(
      mpv.get_property("pause"),
      Err(MpvError::Ipc(IpcError::NotRunning))
    ));
  }

  #[cfg(unix)]
  mod unix_socket {
    use super::*;
    use std::io::{BufRead, Write};
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::mpv::process::cleanup_ipc;

    /// Stands in for mpv: binds the socket, replies to every command and
    /// emits one event per command.
    struct FakePlayer {
      launches: AtomicUsize,
      bind_delay: Duration,
      bind: bool,
      close_after: Option<usize>,
      received: Arc<Mutex<Vec<String>>>,
    }

    impl FakePlayer {
      fn new() -> Self {
        Self {
          launches: AtomicUsize::new(0),
          bind_delay: Duration::ZERO,
          bind: true,
          close_after: None,
          received: Arc::new(Mutex::new(Vec::new())),
        }
      }

      fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
      }
    }

    impl Launcher for FakePlayer {
      fn launch(&self, socket_path: &Path) -> Result<(), ProcessError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if !self.bind {
          return Ok(());
        }

        cleanup_ipc(socket_path);
        let path = socket_path.to_path_buf();
        let delay = self.bind_delay;
        let close_after = self.close_after;
        let received = self.received.clone();
        thread::spawn(move || {
          thread::sleep(delay);
          let listener = UnixListener::bind(&path).unwrap();
          let (stream, _) = listener.accept().unwrap();
          serve(stream, received, close_after);
        });
        Ok(())
      }
    }

    fn serve(stream: UnixStream, received: Arc<Mutex<Vec<String>>>, close_after: Option<usize>) {
      let mut writer = stream.try_clone().unwrap();
      let reader = std::io::BufReader::new(stream);
      for (n, line) in reader.lines().enumerate() {
        let Ok(line) = line else { break };
        received.lock().push(line);
        let reply = format!("{{\"error\":\"success\",\"data\":{}}}\n{{\"event\":\"seen\",\"id\":{}}}\n", n, n);
        if writer.write_all(reply.as_bytes()).is_err() {
          break;
        }
        if close_after == Some(n + 1) {
          break;
        }
      }
    }

    fn socket_path() -> PathBuf {
      std::env::temp_dir().join(format!("terebi-test-{}.sock", uuid::Uuid::new_v4().simple()))
    }

    fn client(player: Arc<FakePlayer>, timeout_ms: u64) -> Mpv {
      let config = MpvConfig {
        connect_retry_ms: 10,
        connect_timeout_ms: timeout_ms,
        ..MpvConfig::with_socket_path(socket_path())
      };
      Mpv::with_launcher(config, player).unwrap()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
      let deadline = Instant::now() + Duration::from_secs(5);
      while Instant::now() < deadline {
        if condition() {
          return true;
        }
        thread::sleep(Duration::from_millis(5));
      }
      condition()
    }

    #[test]
    fn test_play_starts_player_once() {
      let player = Arc::new(FakePlayer::new());
      let mpv = client(player.clone(), 5000);

      let loaded = mpv.play("video.mkv", true).unwrap();
      assert_eq!(mpv.state(), ConnectionState::Connected);
      assert_eq!(loaded.ask(true, WAIT).unwrap(), json!({"error": "success", "data": 0}));

      let again = mpv.play("other.mkv", false).unwrap();
      assert_eq!(again.ask(true, WAIT).unwrap()["data"], 2);
      assert_eq!(player.launches(), 1);

      assert!(wait_until(|| player.received.lock().len() == 4));
      assert_eq!(
        *player.received.lock(),
        vec![
          r#"{"command":["loadfile","video.mkv"]}"#.to_string(),
          r#"{"command":["set_property","pause",false]}"#.to_string(),
          r#"{"command":["loadfile","other.mkv"]}"#.to_string(),
          r#"{"command":["set_property","pause",true]}"#.to_string(),
        ]
      );

      assert_eq!(mpv.get_event(true, WAIT).unwrap(), json!({"event": "seen", "id": 0}));
      assert_eq!(mpv.get_event(true, WAIT).unwrap()["id"], 1);
    }

    #[test]
    fn test_connect_retries_until_socket_appears() {
      let player = Arc::new(FakePlayer {
        bind_delay: Duration::from_millis(150),
        ..FakePlayer::new()
      });
      let mpv = client(player, 5000);
      mpv.start().unwrap();
      assert!(mpv.is_running());
      assert_eq!(mpv.get_property("pause").unwrap().ask(true, WAIT).unwrap()["error"], "success");
    }

    #[test]
    fn test_connect_times_out() {
      let player = Arc::new(FakePlayer {
        bind: false,
        ..FakePlayer::new()
      });
      let mpv = client(player, 100);
      assert!(matches!(
        mpv.start(),
        Err(MpvError::Ipc(IpcError::ConnectionFailed(_)))
      ));
      assert_eq!(mpv.state(), ConnectionState::Disconnected);
      assert!(!mpv.is_running());
    }

    #[test]
    fn test_play_reconnects_after_disconnect() {
      let player = Arc::new(FakePlayer {
        close_after: Some(2),
        ..FakePlayer::new()
      });
      let mpv = client(player.clone(), 5000);

      mpv.play("first.mkv", true).unwrap();
      assert!(wait_until(|| mpv.state() == ConnectionState::Disconnected));
      assert!(matches!(
        mpv.pause(),
        Err(MpvError::Ipc(IpcError::NotRunning))
      ));

      let loaded = mpv.play("second.mkv", true).unwrap();
      assert_eq!(loaded.ask(true, WAIT).unwrap()["data"], 0);
      assert_eq!(player.launches(), 2);
    }

    #[test]
    fn test_shutdown_quits_player() {
      let player = Arc::new(FakePlayer::new());
      let mpv = client(player.clone(), 5000);
      mpv.start().unwrap();
      mpv.shutdown();
      assert!(!mpv.is_running());
      assert!(wait_until(|| player
        .received
        .lock()
        .contains(&r#"{"command":["quit"]}"#.to_string())));
    }
  }
}
