//! Plugin client: one supervised process plus the host-side policy around it

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::process::{ProcessState, ProcessSupervisor, SupervisorSettings};
use crate::message::{MESSAGE_CLASS_BASIC, Message};

/// Update frequency class of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    Sleep,
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Poll interval for this priority
    pub fn poll_interval(self) -> Duration {
        match self {
            Priority::Sleep => Duration::from_secs(1),
            Priority::Low => Duration::from_secs_f64(1.0 / 25.0),
            Priority::Normal => Duration::from_secs_f64(1.0 / 50.0),
            Priority::High => Duration::from_secs_f64(1.0 / 100.0),
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Priority::Sleep => "sleep",
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

/// Behaviour of a concrete plugin kind.
///
/// The client calls these hooks from its `init`/`reset`/`idle` steps and for
/// every message the child sends that is not handled by the supervisor.
pub trait BasicPlugin {
    /// File name of the plugin executable, without platform suffix
    fn plugin_basename() -> &'static str;

    /// Called before the process is launched; returning false aborts `init`
    fn init_impl(&mut self) -> bool {
        true
    }

    fn reset_impl(&mut self) {}

    /// Called once per tick after the supervisor step
    fn idle_impl(&mut self) {}

    fn priority_changed(&mut self, _priority: Priority) {}

    /// Handle an incoming message; return false if it was not understood
    fn receive_plugin_message(&mut self, message: &Message) -> bool;

    /// The child announced it is shutting down. Returning true lets the
    /// client mark the process Exited right away.
    fn received_shutdown(&mut self) -> bool {
        true
    }
}

/// Owns one [`ProcessSupervisor`] and the outgoing send queue
pub struct PluginClient<P: BasicPlugin> {
    plugin: P,
    settings: SupervisorSettings,
    supervisor: Option<ProcessSupervisor>,
    priority: Priority,
    poll_interval: Duration,
    send_queue: VecDeque<Message>,
    delete_ok: bool,
}

impl<P: BasicPlugin> PluginClient<P> {
    pub fn new(plugin: P, settings: SupervisorSettings) -> Self {
        let priority = Priority::default();
        Self {
            plugin,
            settings,
            supervisor: None,
            priority,
            poll_interval: priority.poll_interval(),
            send_queue: VecDeque::new(),
            delete_ok: true,
        }
    }

    /// Launch `plugin_file` through `launcher` with `plugin_dir` as working
    /// directory. Any previous process is torn down first.
    pub fn init(&mut self, launcher: &Path, plugin_dir: &Path, plugin_file: &Path) -> bool {
        if self.supervisor.is_some() {
            self.reset();
        }
        if !self.plugin.init_impl() {
            debug!("Plugin {} refused to initialize", P::plugin_basename());
            return false;
        }

        let mut supervisor = ProcessSupervisor::new(self.settings.clone());
        supervisor.set_poll_interval(self.poll_interval);
        let args = vec![plugin_file.display().to_string()];
        let launched = supervisor.launch(launcher, &args, Some(plugin_dir));
        self.supervisor = Some(supervisor);

        match launched {
            Ok(handle) => {
                debug!("Launched plugin {} (pid {:?})", P::plugin_basename(), handle.pid);
                true
            }
            Err(e) => {
                error!("Failed to launch plugin {}: {}", P::plugin_basename(), e);
                false
            }
        }
    }

    /// Undo `init`: terminate the process and drop anything still queued
    pub fn reset(&mut self) {
        if let Some(mut supervisor) = self.supervisor.take() {
            supervisor.terminate();
        }
        if !self.send_queue.is_empty() {
            debug!("Dropping {} queued messages on reset", self.send_queue.len());
            self.send_queue.clear();
        }
        self.plugin.reset_impl();
    }

    /// One scheduler tick
    pub fn idle(&mut self) {
        let Some(supervisor) = self.supervisor.as_mut() else {
            return;
        };

        supervisor.idle();
        for message in supervisor.poll_incoming() {
            dispatch(&mut self.plugin, &message);
        }
        if supervisor.take_shutdown_request() && self.plugin.received_shutdown() {
            supervisor.exit_state();
        }

        self.plugin.idle_impl();

        if supervisor.is_running() {
            while let Some(message) = self.send_queue.pop_front() {
                supervisor.send(&message);
            }
        }
    }

    /// Send now if the child is Running and nothing is waiting, otherwise queue
    pub fn send_message(&mut self, message: Message) {
        match self.supervisor.as_mut() {
            Some(supervisor) if supervisor.is_running() && self.send_queue.is_empty() => {
                supervisor.send(&message);
            }
            _ => self.send_queue.push_back(message),
        }
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
        self.poll_interval = priority.poll_interval();
        if let Some(supervisor) = self.supervisor.as_mut() {
            supervisor.set_poll_interval(self.poll_interval);
        }
        self.send_message(
            Message::new(MESSAGE_CLASS_BASIC, "set_priority")
                .with_value("priority", priority.keyword()),
        );
        self.plugin.priority_changed(priority);
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Lifecycle state, `None` before `init` or after `reset`
    pub fn state(&self) -> Option<ProcessState> {
        self.supervisor.as_ref().map(ProcessSupervisor::state)
    }

    pub fn is_loading(&self) -> bool {
        self.state() == Some(ProcessState::Loading)
    }

    pub fn is_running(&self) -> bool {
        self.state() == Some(ProcessState::Running)
    }

    pub fn is_exited(&self) -> bool {
        self.state() == Some(ProcessState::Exited)
    }

    pub fn plugin_version(&self) -> Option<&str> {
        self.supervisor.as_ref().and_then(ProcessSupervisor::plugin_version)
    }

    pub fn queued_len(&self) -> usize {
        self.send_queue.len()
    }

    /// Clear to protect the client from teardown while a callback is in flight
    pub fn set_delete_ok(&mut self, delete_ok: bool) {
        self.delete_ok = delete_ok;
    }

    pub fn delete_ok(&self) -> bool {
        self.delete_ok
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn plugin_mut(&mut self) -> &mut P {
        &mut self.plugin
    }
}

fn dispatch<P: BasicPlugin>(plugin: &mut P, message: &Message) {
    if !plugin.receive_plugin_message(message) {
        warn!("Unknown {} class message: {}", message.class, message.name);
    }
}
