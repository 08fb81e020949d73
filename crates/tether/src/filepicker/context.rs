//! Last folder used per picker context
//!
//! One store is shared by every picker in the process. It is loaded from and
//! saved to a JSON document on explicit request only.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

/// File name of the persisted context map
pub const CONTEXT_FILE_NAME: &str = "filepicker_contexts.json";

/// Context key used for saves that do not name their own context
pub const SAVE_CONTEXT: &str = "savefile";
/// Context key used for loads that do not name their own context
pub const LOAD_CONTEXT: &str = "openfile";

/// Default location of the context file, under the user config directory
pub fn default_context_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tether").join(CONTEXT_FILE_NAME))
}

/// Thread-safe map from context key to folder path
#[derive(Debug, Default)]
pub struct ContextStore {
    folders: RwLock<BTreeMap<String, String>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored folder for `context`, if any and not empty
    pub fn get_folder(&self, context: &str) -> Option<String> {
        self.folders
            .read()
            .get(context)
            .filter(|folder| !folder.is_empty())
            .cloned()
    }

    /// Remember `folder` for `context`; empty folders are ignored
    pub fn store_folder(&self, context: &str, folder: &str) {
        if folder.is_empty() {
            return;
        }
        debug!("Context \"{}\" now opens in \"{}\"", context, folder);
        self.folders.write().insert(context.to_string(), folder.to_string());
    }

    pub fn len(&self) -> usize {
        self.folders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.read().is_empty()
    }

    /// Copy of the whole map
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.folders.read().clone()
    }

    /// Merge the contexts stored in `path`.
    ///
    /// Entries already set in this process win. A missing or malformed file
    /// leaves the store untouched and returns false.
    pub fn load_file(&self, path: &Path) -> bool {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No picker context file at {}: {}", path.display(), e);
                return false;
            }
        };
        let loaded: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&content) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Ignoring ill-formed picker context file {}: {}", path.display(), e);
                return false;
            }
        };

        info!("Loading picker context file {}", path.display());
        let mut folders = self.folders.write();
        for (context, value) in loaded {
            let folder = match value {
                serde_json::Value::String(folder) => folder,
                other => other.to_string(),
            };
            folders.entry(context).or_insert(folder);
        }
        true
    }

    /// Write the store to `path` as pretty JSON.
    ///
    /// Returns false without touching the file when the store is empty or
    /// the file cannot be written.
    pub fn save_file(&self, path: &Path) -> bool {
        let folders = self.snapshot();
        if folders.is_empty() {
            return false;
        }
        let json = match serde_json::to_string_pretty(&folders) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode picker contexts: {}", e);
                return false;
            }
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Unable to create {}: {}", parent.display(), e);
                return false;
            }
        }
        if let Err(e) = std::fs::write(path, json) {
            warn!("Unable to save picker context file {}: {}", path.display(), e);
            return false;
        }
        info!("Saved picker contexts to {}", path.display());
        true
    }
}
