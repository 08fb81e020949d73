//! Out-of-process plugins
//!
//! Plugins are separate executables started through a launcher. The host
//! talks to them over their stdin/stdout using [`Message`](crate::message::Message)
//! frames.
//!
//! Layering, leaf first:
//! - [`ipc`]: frame reader/writer over the child's pipes
//! - [`process`]: one child process, handshake, liveness, exit detection
//! - [`client`]: priority policy, send queue, message dispatch to a [`BasicPlugin`]
//! - [`manager`]: path resolution and ownership of at most one client

pub mod client;
pub mod ipc;
pub mod manager;
pub mod process;

#[cfg(all(test, unix))]
pub(crate) mod testing;

pub use client::{BasicPlugin, PluginClient, Priority};
pub use manager::{PluginError, PluginManager, PluginPaths};
pub use process::{LaunchError, ProcessHandle, ProcessState, ProcessSupervisor, SupervisorSettings};
