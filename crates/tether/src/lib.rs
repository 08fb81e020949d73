//! Tether - out-of-process plugin supervision
//!
//! This crate provides:
//! - A class/name addressed message envelope for plugin channels
//! - Supervision of plugin child processes (handshake, liveness, exit)
//! - A plugin client/manager layer with priorities and a send queue
//! - Cooperative state-machine tasks and a frame-based driver
//! - A file picker task that talks to the `tether-picker` plugin

// Wire envelope
pub mod message;

// Plugin processes, clients and the manager
pub mod plugin;

// Cooperative tasks
pub mod task;

// File picker protocol
pub mod filepicker;

// tether.toml
pub mod config;

pub use message::Message;
