//! Plugin message envelope
//!
//! Every frame exchanged with a plugin process is a JSON object of the form
//! `{ "class": ..., "name": ..., <payload keys...> }`. The class/name pair
//! decides how the payload is interpreted; receivers ignore pairs they do not
//! understand.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Handshake and liveness messages exchanged by the supervisor itself.
pub const MESSAGE_CLASS_BASE: &str = "base";
/// Messages understood by every basic plugin (file picker, ...).
pub const MESSAGE_CLASS_BASIC: &str = "basic";
/// Out-of-band messages from the plugin runtime (logging, shutdown).
pub const MESSAGE_CLASS_INTERNAL: &str = "internal";

pub const MESSAGE_CLASS_BASE_VERSION: &str = "1.0";
pub const MESSAGE_CLASS_BASIC_VERSION: &str = "1.0";

/// Envelope keys that can never be used for payload values
const RESERVED_KEYS: [&str; 2] = ["class", "name"];

/// Error type for message encoding/decoding
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed message frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message frame is not valid UTF-8")]
    InvalidUtf8,
}

/// A class + name addressed message with an ordered key/value payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub class: String,
    pub name: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Message {
    pub fn new(class: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
            payload: Map::new(),
        }
    }

    /// Builder-style variant of [`Message::set_value`]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_value(key, value);
        self
    }

    /// Store `value` under `key`. The envelope keys `class` and `name` are
    /// rejected, they would clash with the address on the wire.
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if RESERVED_KEYS.contains(&key.as_str()) {
            warn!("Ignoring reserved payload key \"{}\" on {}/{}", key, self.class, self.name);
            return;
        }
        self.payload.insert(key, value.into());
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// String value for `key`, `None` when absent or not a string
    pub fn value_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn has_value(&self, key: &str) -> bool {
        self.payload.contains_key(key)
    }

    pub fn is(&self, class: &str, name: &str) -> bool {
        self.class == class && self.name == name
    }

    /// Deserialize the value stored under `key`
    pub fn parse_value<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<T, MessageError> {
        let value = self.payload.get(key).cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    /// Encode as a single newline-terminated frame
    pub fn to_frame(&self) -> Result<Vec<u8>, MessageError> {
        let mut frame = serde_json::to_vec(self)?;
        frame.push(b'\n');
        Ok(frame)
    }

    /// Decode one frame (without its terminator)
    pub fn from_frame(frame: &[u8]) -> Result<Self, MessageError> {
        let text = std::str::from_utf8(frame).map_err(|_| MessageError::InvalidUtf8)?;
        Ok(serde_json::from_str(text.trim_end_matches('\r'))?)
    }
}
