//! Plugin process supervision
//!
//! A [`ProcessSupervisor`] owns one child process and the framed message
//! channel over its stdin/stdout. It never blocks: sends are queued to a
//! writer task, received frames are collected by a reader task and picked up
//! by [`ProcessSupervisor::idle`], which is called once per scheduler tick.
//!
//! Lifecycle: `Loading` until the child answers the `base/init` handshake,
//! then `Running`, then `Exited` once the child is gone (or never started).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ipc::{IpcReader, IpcWriter};

use crate::message::{
    MESSAGE_CLASS_BASE, MESSAGE_CLASS_BASE_VERSION, MESSAGE_CLASS_BASIC,
    MESSAGE_CLASS_BASIC_VERSION, MESSAGE_CLASS_INTERNAL, Message,
};

/// How long output may stay open after the child itself has exited
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Coarse lifecycle state of a plugin process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Loading,
    Running,
    Exited,
}

/// Error type for launching a plugin process
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Executable not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to get {0} of the plugin process")]
    Pipe(&'static str),

    #[error("Process already launched")]
    AlreadyLaunched,

    #[error("No async runtime available to drive the plugin channel")]
    NoRuntime,
}

/// Timeouts applied to a supervised process
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// How long the child may take to answer the handshake
    pub launch_timeout: Duration,
    /// Maximum silence from a running child; `None` disables the check
    pub heartbeat_timeout: Option<Duration>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            launch_timeout: Duration::from_secs(10),
            heartbeat_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Identity of a launched child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
}

/// Owns a plugin child process and its message channel
pub struct ProcessSupervisor {
    label: String,
    state: ProcessState,
    settings: SupervisorSettings,
    poll_interval: Duration,
    child: Option<Child>,
    exit_status: Option<ExitStatus>,
    exited_at: Option<Instant>,
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
    incoming: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    reader_handle: Option<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<()>>,
    inbox: VecDeque<Message>,
    launched_at: Option<Instant>,
    last_heard: Instant,
    last_ping: Option<Instant>,
    /// Set while the child is expected to block (no heartbeat)
    blocked: bool,
    shutdown_requested: bool,
    plugin_version: Option<String>,
    terminated: bool,
}

impl ProcessSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            label: String::from("<unlaunched>"),
            state: ProcessState::Loading,
            settings,
            poll_interval: Duration::from_millis(20),
            child: None,
            exit_status: None,
            exited_at: None,
            outgoing: None,
            incoming: None,
            reader_handle: None,
            writer_handle: None,
            inbox: VecDeque::new(),
            launched_at: None,
            last_heard: Instant::now(),
            last_ping: None,
            blocked: false,
            shutdown_requested: false,
            plugin_version: None,
            terminated: false,
        }
    }

    /// Spawn `program` with `args` and start the handshake.
    ///
    /// Must be called from within a tokio runtime. On failure the supervisor
    /// reports [`ProcessState::Exited`].
    pub fn launch(
        &mut self,
        program: &Path,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<ProcessHandle, LaunchError> {
        if self.child.is_some() || self.terminated {
            return Err(LaunchError::AlreadyLaunched);
        }
        let result = self.spawn_process(program, args, working_dir);
        if result.is_err() {
            self.state = ProcessState::Exited;
            self.terminated = true;
        }
        result
    }

    fn spawn_process(
        &mut self,
        program: &Path,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<ProcessHandle, LaunchError> {
        if !program.exists() {
            return Err(LaunchError::NotFound(program.to_path_buf()));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(LaunchError::NoRuntime);
        }

        self.label = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        if let Some(arg) = args.first() {
            self.label = format!("{} {}", self.label, arg);
        }

        info!("Spawning plugin process: {} {}", program.display(), args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Plugin stderr goes to our stderr
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            path: program.to_path_buf(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(LaunchError::Pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(LaunchError::Pipe("stdout"))?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.writer_handle = Some(IpcWriter::new(stdin).spawn(out_rx, self.label.clone()));
        self.reader_handle = Some(IpcReader::new(stdout).spawn(in_tx, self.label.clone()));

        let handle = ProcessHandle { pid: child.id() };
        self.child = Some(child);
        self.outgoing = Some(out_tx);
        self.incoming = Some(in_rx);
        self.state = ProcessState::Loading;
        self.launched_at = Some(Instant::now());
        self.last_heard = Instant::now();

        let init = Message::new(MESSAGE_CLASS_BASE, "init").with_value(
            "versions",
            json!({
                MESSAGE_CLASS_BASE: MESSAGE_CLASS_BASE_VERSION,
                MESSAGE_CLASS_BASIC: MESSAGE_CLASS_BASIC_VERSION,
            }),
        );
        self.write(&init);

        Ok(handle)
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == ProcessState::Loading
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    pub fn is_exited(&self) -> bool {
        self.state == ProcessState::Exited
    }

    pub fn plugin_version(&self) -> Option<&str> {
        self.plugin_version.as_deref()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    /// Send a message to the child.
    ///
    /// Silently dropped once the channel is gone; callers check the state or
    /// queue upstream.
    pub fn send(&mut self, message: &Message) {
        if self.state == ProcessState::Exited {
            debug!("Dropping {}/{} for exited plugin {}", message.class, message.name, self.label);
            return;
        }
        if message.value_str("gorgon") == Some("block") {
            self.blocked = true;
        }
        self.write(message);
    }

    fn write(&mut self, message: &Message) {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode {}/{}: {}", message.class, message.name, e);
                return;
            }
        };
        if let Some(tx) = &self.outgoing {
            if tx.send(frame).is_err() {
                debug!("Plugin {} input closed, message {} dropped", self.label, message.name);
            }
        }
    }

    /// Messages received since the last call, in arrival order
    pub fn poll_incoming(&mut self) -> Vec<Message> {
        self.inbox.drain(..).collect()
    }

    /// Returns true once per received shutdown request
    pub fn take_shutdown_request(&mut self) -> bool {
        std::mem::take(&mut self.shutdown_requested)
    }

    /// One non-blocking step: collect frames, detect exit, enforce timeouts.
    pub fn idle(&mut self) {
        if self.state == ProcessState::Exited {
            return;
        }

        if self.exit_status.is_none() {
            if let Some(child) = self.child.as_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        info!("Plugin {} exited with status: {}", self.label, status);
                        self.exit_status = Some(status);
                        self.exited_at = Some(Instant::now());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Error waiting for plugin {}: {}", self.label, e);
                        self.exit_state();
                        return;
                    }
                }
            }
        }

        let mut closed = self.incoming.is_none();
        while let Some(rx) = self.incoming.as_mut() {
            match rx.try_recv() {
                Ok(frame) => self.handle_frame(&frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        // Only report the exit once every complete frame has been delivered,
        // unless something else keeps the pipe open.
        let now = Instant::now();
        if let Some(exited_at) = self.exited_at {
            if closed || now.duration_since(exited_at) > EXIT_DRAIN_GRACE {
                self.exit_state();
                return;
            }
        }

        match self.state {
            ProcessState::Loading => {
                let started = self.launched_at.unwrap_or(now);
                if now.duration_since(started) > self.settings.launch_timeout {
                    warn!(
                        "Plugin {} did not finish its handshake within {:?}, killing",
                        self.label, self.settings.launch_timeout
                    );
                    self.exit_state();
                }
            }
            ProcessState::Running => self.check_heartbeat(now),
            ProcessState::Exited => {}
        }
    }

    fn check_heartbeat(&mut self, now: Instant) {
        let Some(timeout) = self.settings.heartbeat_timeout else {
            return;
        };
        if self.blocked {
            return;
        }
        if now.duration_since(self.last_heard) > timeout {
            warn!(
                "Plugin {} stopped responding (no message in {:?}), killing",
                self.label, timeout
            );
            self.exit_state();
            return;
        }
        let due = self
            .last_ping
            .is_none_or(|at| now.duration_since(at) >= self.poll_interval);
        if due {
            self.last_ping = Some(now);
            let ping = Message::new(MESSAGE_CLASS_BASE, "idle")
                .with_value("time", self.poll_interval.as_secs_f64());
            self.write(&ping);
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let message = match Message::from_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed frame from plugin {}: {}", self.label, e);
                return;
            }
        };
        self.last_heard = Instant::now();
        if message.value_str("perseus") == Some("unblock") {
            self.blocked = false;
        }

        match (message.class.as_str(), message.name.as_str()) {
            (MESSAGE_CLASS_BASE, "init_response") => {
                self.plugin_version = message.value_str("plugin_version").map(String::from);
                if self.state == ProcessState::Loading {
                    debug!(
                        "Plugin {} is ready ({})",
                        self.label,
                        self.plugin_version.as_deref().unwrap_or("unknown version")
                    );
                    self.state = ProcessState::Running;
                }
            }
            (MESSAGE_CLASS_BASE, "heartbeat") => {}
            (MESSAGE_CLASS_BASE | MESSAGE_CLASS_INTERNAL, "shutdown") => {
                debug!("Plugin {} announced shutdown", self.label);
                self.shutdown_requested = true;
            }
            (MESSAGE_CLASS_INTERNAL, "log_message") => self.log_plugin_message(&message),
            (MESSAGE_CLASS_BASE | MESSAGE_CLASS_INTERNAL, name) => {
                debug!("Ignoring {} message from plugin {}: {}", message.class, self.label, name);
            }
            _ => self.inbox.push_back(message),
        }
    }

    fn log_plugin_message(&self, message: &Message) {
        let text = message.value_str("message").unwrap_or_default();
        let level = message
            .value("log_level")
            .and_then(|v| {
                v.as_str()
                    .map(String::from)
                    .or_else(|| v.as_i64().map(|n| n.to_string()))
            })
            .unwrap_or_default();
        match level.as_str() {
            "trace" | "0" => tracing::trace!(target: "plugin", "[{}] {}", self.label, text),
            "debug" | "1" => tracing::debug!(target: "plugin", "[{}] {}", self.label, text),
            "warn" | "3" => tracing::warn!(target: "plugin", "[{}] {}", self.label, text),
            "error" | "4" => tracing::error!(target: "plugin", "[{}] {}", self.label, text),
            _ => tracing::info!(target: "plugin", "[{}] {}", self.label, text),
        }
    }

    /// Force the Exited state, terminating the child if still alive
    pub fn exit_state(&mut self) {
        self.terminate();
    }

    /// Kill the child and close the channel. Idempotent.
    pub fn terminate(&mut self) {
        self.state = ProcessState::Exited;
        if self.terminated {
            return;
        }
        self.terminated = true;

        if let Some(mut child) = self.child.take() {
            if self.exit_status.is_none() {
                match child.try_wait() {
                    Ok(Some(status)) => self.exit_status = Some(status),
                    _ => {
                        debug!("Killing plugin {}", self.label);
                        if let Err(e) = child.start_kill() {
                            debug!("Plugin {} could not be killed: {}", self.label, e);
                        }
                    }
                }
            }
        }
        self.outgoing = None;
        self.incoming = None;
        if let Some(handle) = self.writer_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.terminate();
    }
}
