//! File picker built on the plugin layer
//!
//! [`FilePickerTask`] runs the `tether-picker` plugin through one open/save
//! dialog. The last folder used per context is kept in a shared
//! [`ContextStore`] that callers load and save explicitly.

pub mod context;
pub mod filter;
pub mod naming;
mod task;

pub use context::{
    CONTEXT_FILE_NAME, ContextStore, LOAD_CONTEXT, SAVE_CONTEXT, default_context_file,
};
pub use filter::{LoadFilter, SaveFilter, UnknownFilter};
pub use task::{
    DICTIONARY_DEFAULTS, FilePicker, FilePickerTask, OpenType, PICKER_PLUGIN, PickerConfig,
    PickerError, PickerEvent, PickerPlugin, PickerState, resolve_folder,
};
