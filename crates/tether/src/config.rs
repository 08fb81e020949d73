//! Configuration file (`tether.toml`)
//!
//! Every field is optional; a missing file means defaults.
//!
//! ```toml
//! [plugins]
//! launcher = "/usr/lib/tether/tether-picker"
//! plugin_dir = "/usr/lib/tether"
//! launch_timeout_secs = 10
//! heartbeat_timeout_secs = 30   # 0 disables the heartbeat check
//!
//! [picker]
//! context_file = "/home/u/.config/tether/filepicker_contexts.json"
//! poll_interval_ms = 250
//!
//! [picker.dictionary]
//! save_file_verb = "Save"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::filepicker::{PICKER_PLUGIN, PickerConfig, default_context_file};
use crate::plugin::{PluginPaths, SupervisorSettings};

/// Default file name looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "tether.toml";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TetherConfig {
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub picker: PickerSection,
}

/// Plugin process settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Executable used to start plugins
    pub launcher: Option<PathBuf>,
    /// Directory holding the plugin executables
    pub plugin_dir: Option<PathBuf>,
    #[serde(default = "default_launch_timeout")]
    pub launch_timeout_secs: u64,
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            launcher: None,
            plugin_dir: None,
            launch_timeout_secs: default_launch_timeout(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
        }
    }
}

fn default_launch_timeout() -> u64 {
    10
}

fn default_heartbeat_timeout() -> u64 {
    30
}

/// File picker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickerSection {
    /// Where the per-context folders are persisted
    pub context_file: Option<PathBuf>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Overrides the detected home directory
    pub home_dir: Option<PathBuf>,
    /// Localized strings sent to the plugin
    #[serde(default)]
    pub dictionary: BTreeMap<String, String>,
}

impl Default for PickerSection {
    fn default() -> Self {
        Self {
            context_file: None,
            poll_interval_ms: default_poll_interval(),
            home_dir: None,
            dictionary: BTreeMap::new(),
        }
    }
}

fn default_poll_interval() -> u64 {
    250
}

impl TetherConfig {
    /// Load `path`, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        let heartbeat = self.plugins.heartbeat_timeout_secs;
        SupervisorSettings {
            launch_timeout: Duration::from_secs(self.plugins.launch_timeout_secs),
            heartbeat_timeout: (heartbeat > 0).then(|| Duration::from_secs(heartbeat)),
        }
    }

    /// Launcher and plugin directory, defaulting to the directory of the
    /// running executable
    pub fn plugin_paths(&self) -> PluginPaths {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        let plugin_dir = self
            .plugins
            .plugin_dir
            .clone()
            .or_else(|| exe_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."));
        let launcher = self.plugins.launcher.clone().unwrap_or_else(|| {
            let name = format!("{}{}", PICKER_PLUGIN, std::env::consts::EXE_SUFFIX);
            exe_dir.map(|dir| dir.join(&name)).unwrap_or_else(|| PathBuf::from(name))
        });
        PluginPaths::new(launcher, plugin_dir)
    }

    pub fn context_file(&self) -> Option<PathBuf> {
        self.picker.context_file.clone().or_else(default_context_file)
    }

    pub fn picker_config(&self) -> PickerConfig {
        let mut config = PickerConfig::new(self.plugin_paths());
        config.supervisor = self.supervisor_settings();
        config.poll_interval = Duration::from_millis(self.picker.poll_interval_ms);
        config.home_dir = self.picker.home_dir.clone();
        config.dictionary = self.picker.dictionary.clone();
        config
    }
}
