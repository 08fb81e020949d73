//! File picker task
//!
//! Drives the `tether-picker` plugin through one dialog:
//! launch, `initialization`, `open`, then wait for `canceled` or `done`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::context::ContextStore;
use super::filter::{LoadFilter, SaveFilter};
use super::naming::save_file_name;
use crate::message::{MESSAGE_CLASS_BASIC, Message};
use crate::plugin::{
    BasicPlugin, PluginClient, PluginError, PluginManager, PluginPaths, SupervisorSettings,
};
use crate::task::{AsyncTask, Control, StateMachine};

/// Basename of the picker plugin executable
pub const PICKER_PLUGIN: &str = "tether-picker";

/// Keys of the localized strings the plugin asks for, with English defaults
pub const DICTIONARY_DEFAULTS: [(&str, &str); 15] = [
    ("all_files", "All Files"),
    ("sound_files", "Sounds"),
    ("animation_files", "Animations"),
    ("image_files", "Images"),
    ("save_file_verb", "Save"),
    ("targa_image_files", "Targa Images"),
    ("bitmap_image_files", "Bitmap Images"),
    ("avi_movie_file", "AVI Movie File"),
    ("xaf_animation_file", "XAF Anim File"),
    ("xml_file", "XML File"),
    ("raw_file", "RAW File"),
    ("compressed_image_files", "Compressed Images"),
    ("load_file_verb", "Load"),
    ("load_files", "Load Files"),
    ("choose_the_directory", "Choose Directory"),
];

/// A picker that is driven as an [`AsyncTask`]
pub type FilePicker = AsyncTask<FilePickerTask>;

/// Error type for a picker run that ended without an answer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PickerError {
    #[error("open() was not called before run()")]
    NotOpened,

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("File picker plugin exited without answering")]
    PluginExited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerState {
    InitializingPlugin,
    PluginRunning,
    Canceled,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenType {
    Save,
    Load,
    LoadMultiple,
}

impl OpenType {
    pub fn keyword(self) -> &'static str {
        match self {
            OpenType::Save => "save",
            OpenType::Load => "load",
            OpenType::LoadMultiple => "load_multiple",
        }
    }
}

/// Settings shared by every picker run
#[derive(Debug, Clone)]
pub struct PickerConfig {
    /// Where the launcher and the picker plugin live
    pub paths: PluginPaths,
    /// Handshake and heartbeat timeouts
    pub supervisor: SupervisorSettings,
    /// Delay between polls while the dialog is open
    pub poll_interval: Duration,
    /// Last-resort starting folder; the user's home directory when unset
    pub home_dir: Option<PathBuf>,
    /// Native window the dialog should be transient for
    pub window_id: Option<u64>,
    /// Overrides for [`DICTIONARY_DEFAULTS`]
    pub dictionary: BTreeMap<String, String>,
}

impl PickerConfig {
    pub fn new(paths: PluginPaths) -> Self {
        Self {
            paths,
            supervisor: SupervisorSettings::default(),
            poll_interval: Duration::from_millis(250),
            home_dir: None,
            window_id: None,
            dictionary: BTreeMap::new(),
        }
    }
}

/// Answer received from the plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerEvent {
    Canceled,
    Done(Vec<String>),
}

/// Plugin side of the picker: turns protocol messages into [`PickerEvent`]s
pub struct PickerPlugin {
    events: mpsc::UnboundedSender<PickerEvent>,
}

impl PickerPlugin {
    pub fn new(events: mpsc::UnboundedSender<PickerEvent>) -> Self {
        Self { events }
    }

    fn emit(&self, event: PickerEvent) {
        if self.events.send(event).is_err() {
            debug!("Picker answer arrived after the task stopped listening");
        }
    }
}

impl BasicPlugin for PickerPlugin {
    fn plugin_basename() -> &'static str {
        PICKER_PLUGIN
    }

    fn receive_plugin_message(&mut self, message: &Message) -> bool {
        if message.class != MESSAGE_CLASS_BASIC {
            return false;
        }
        match message.name.as_str() {
            "canceled" => {
                debug!("received message \"canceled\"");
                self.emit(PickerEvent::Canceled);
                true
            }
            "done" => {
                debug!("received message \"done\"");
                match message.parse_value::<Vec<String>>("filenames") {
                    Ok(filenames) if !filenames.is_empty() => {
                        self.emit(PickerEvent::Done(filenames))
                    }
                    Ok(_) => {
                        warn!("Picker reported done without filenames, treating as canceled");
                        self.emit(PickerEvent::Canceled);
                    }
                    Err(e) => {
                        warn!("Picker sent unreadable filenames ({}), treating as canceled", e);
                        self.emit(PickerEvent::Canceled);
                    }
                }
                true
            }
            _ => false,
        }
    }

    // The plugin exits on its own right after announcing shutdown.
    fn received_shutdown(&mut self) -> bool {
        false
    }
}

/// Starting folder for a dialog.
///
/// Order: the folder stored for `context`, `default_path`, the folder stored
/// for the save context, `home`, the filesystem root.
pub fn resolve_folder(
    contexts: &ContextStore,
    context: &str,
    default_path: &str,
    home: Option<&Path>,
) -> String {
    if let Some(folder) = contexts.get_folder(context) {
        return folder;
    }
    if !default_path.is_empty() {
        debug!("context \"{}\" not found, using default path \"{}\"", context, default_path);
        return default_path.to_string();
    }
    if let Some(folder) = contexts.get_folder(super::context::SAVE_CONTEXT) {
        debug!("context \"{}\" not found, using the save context \"{}\"", context, folder);
        return folder;
    }
    match home.map(|home| home.display().to_string()) {
        Some(home) if !home.is_empty() => home,
        _ => {
            let root = if cfg!(windows) { "C:\\" } else { "/" };
            debug!("context \"{}\" not found and no home directory, using \"{}\"", context, root);
            root.to_string()
        }
    }
}

/// State machine of one file dialog
pub struct FilePickerTask {
    config: PickerConfig,
    contexts: Arc<ContextStore>,
    open_type: OpenType,
    filter: Option<&'static str>,
    filename: String,
    folder: String,
    context: String,
    manager: Option<PluginManager<PickerPlugin>>,
    events: Option<mpsc::UnboundedReceiver<PickerEvent>>,
    canceled: bool,
    filenames: Vec<String>,
    failure: Option<PickerError>,
}

impl FilePickerTask {
    pub fn new(config: PickerConfig, contexts: Arc<ContextStore>) -> Self {
        Self {
            config,
            contexts,
            open_type: OpenType::Load,
            filter: None,
            filename: String::new(),
            folder: String::new(),
            context: String::new(),
            manager: None,
            events: None,
            canceled: false,
            filenames: Vec::new(),
            failure: None,
        }
    }

    /// Convenience constructor for a task ready to [`run`](AsyncTask::run)
    pub fn into_task(self) -> FilePicker {
        AsyncTask::new(self)
    }

    fn home_dir(&self) -> Option<PathBuf> {
        self.config.home_dir.clone().or_else(dirs::home_dir)
    }

    fn starting_folder_for(&self, context: &str, default_path: &str) -> String {
        let home = self.home_dir();
        resolve_folder(&self.contexts, context, default_path, home.as_deref())
    }

    /// Prepare a save dialog proposing `filename`
    pub fn open_save(
        &mut self,
        filename: &str,
        filter: SaveFilter,
        default_path: &str,
        context: &str,
    ) {
        self.context = context.to_string();
        self.folder = self.starting_folder_for(context, default_path);
        self.filename = save_file_name(filename, Path::new(&self.folder));
        self.open_type = OpenType::Save;
        self.filter = Some(filter.keyword());
    }

    /// Prepare a load dialog
    pub fn open_load(
        &mut self,
        filter: LoadFilter,
        default_path: &str,
        context: &str,
        multiple: bool,
    ) {
        self.context = context.to_string();
        self.folder = self.starting_folder_for(context, default_path);
        self.filename.clear();
        self.open_type = if multiple { OpenType::LoadMultiple } else { OpenType::Load };
        self.filter = Some(filter.keyword());
    }

    pub fn open_type(&self) -> OpenType {
        self.open_type
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter
    }

    /// Folder the dialog opens in
    pub fn starting_folder(&self) -> &str {
        &self.folder
    }

    /// File name proposed by a save dialog
    pub fn default_filename(&self) -> &str {
        &self.filename
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn contexts(&self) -> &Arc<ContextStore> {
        &self.contexts
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    pub fn has_filename(&self) -> bool {
        !self.filenames.is_empty()
    }

    /// First selected file
    pub fn filename(&self) -> Option<&str> {
        self.filenames.first().map(String::as_str)
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    /// Directory of the first selected file
    pub fn folder(&self) -> Option<String> {
        let first = self.filenames.first()?;
        Path::new(first).parent().map(|dir| dir.display().to_string())
    }

    /// Why the last run aborted, if it did
    pub fn failure(&self) -> Option<&PickerError> {
        self.failure.as_ref()
    }

    fn initialization_message(&self) -> Message {
        let mut dictionary = Map::new();
        for (key, english) in DICTIONARY_DEFAULTS {
            let text = self.config.dictionary.get(key).map(String::as_str).unwrap_or(english);
            dictionary.insert(key.to_string(), Value::from(text));
        }
        let mut message = Message::new(MESSAGE_CLASS_BASIC, "initialization")
            .with_value("dictionary", dictionary);
        if let Some(window_id) = self.config.window_id.filter(|id| *id != 0) {
            message.set_value("window_id", format!("{:#x}", window_id));
        }
        message
    }

    fn open_message(&self) -> Message {
        let mut message = Message::new(MESSAGE_CLASS_BASIC, "open")
            .with_value("type", self.open_type.keyword())
            .with_value("filter", self.filter.unwrap_or_default());
        if self.open_type == OpenType::Save {
            message.set_value("default", self.filename.as_str());
        }
        message.set_value("folder", self.folder.as_str());
        // No heartbeat while the user has the dialog open.
        message.set_value("gorgon", "block");
        message
    }
}

impl StateMachine for FilePickerTask {
    type State = PickerState;

    fn name(&self) -> &str {
        "FilePickerTask"
    }

    fn initialize(&mut self, cx: &mut Control<PickerState>) {
        self.canceled = false;
        self.filenames.clear();
        self.failure = None;
        self.manager = None;
        self.events = None;

        if self.filter.is_none() {
            warn!("File picker run without a filter, call open before run");
            self.failure = Some(PickerError::NotOpened);
            cx.abort();
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut manager =
            PluginManager::new(self.config.paths.clone(), self.config.supervisor.clone());
        if let Err(e) = manager.create_plugin(PickerPlugin::new(tx)) {
            self.failure = Some(e.into());
            cx.abort();
            return;
        }
        self.manager = Some(manager);
        self.events = Some(rx);
        cx.set_state(PickerState::InitializingPlugin);
    }

    fn multiplex(&mut self, state: PickerState, cx: &mut Control<PickerState>) {
        match state {
            PickerState::InitializingPlugin | PickerState::PluginRunning => {
                let Some(manager) = self.manager.as_mut() else {
                    cx.abort();
                    return;
                };
                manager.update();
                let alive = manager.has_plugin();
                let running = manager.client().is_some_and(PluginClient::is_running);

                // An answer wins over the exit that follows it.
                match self.events.as_mut().and_then(|rx| rx.try_recv().ok()) {
                    Some(PickerEvent::Canceled) => {
                        cx.set_state(PickerState::Canceled);
                        return;
                    }
                    Some(PickerEvent::Done(filenames)) => {
                        self.filenames = filenames;
                        cx.set_state(PickerState::Done);
                        return;
                    }
                    None => {}
                }

                if !alive {
                    warn!("File picker plugin exited without an answer");
                    self.failure = Some(PickerError::PluginExited);
                    cx.abort();
                    return;
                }

                if state == PickerState::PluginRunning {
                    cx.yield_for(self.config.poll_interval);
                    return;
                }
                if !running {
                    cx.yield_now();
                    return;
                }

                let initialization = self.initialization_message();
                let open = self.open_message();
                if let Some(client) = self.manager.as_mut().and_then(PluginManager::client_mut) {
                    client.send_message(initialization);
                    client.send_message(open);
                }
                cx.set_state(PickerState::PluginRunning);
            }
            PickerState::Canceled => {
                self.canceled = true;
                cx.finish();
            }
            PickerState::Done => {
                if let Some(folder) = self.folder() {
                    self.contexts.store_folder(&self.context, &folder);
                }
                cx.finish();
            }
        }
    }

    fn abort_impl(&mut self) {
        self.filenames.clear();
    }

    fn finish_impl(&mut self) {
        if let Some(mut manager) = self.manager.take() {
            manager.destroy_plugin();
        }
        self.events = None;
        // A new run needs a fresh open().
        self.filter = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filepicker::context::SAVE_CONTEXT;
    use crate::task::{Engine, Step, TaskOutcome};

    fn offline_config() -> PickerConfig {
        let paths = PluginPaths::new("/nonexistent/launcher", "/nonexistent");
        let mut config = PickerConfig::new(paths);
        config.home_dir = Some(PathBuf::from("/home/u"));
        config
    }

    #[test]
    fn test_folder_falls_back_to_home() {
        let mut picker = FilePickerTask::new(offline_config(), Arc::new(ContextStore::new()));
        picker.open_save("foo.png", SaveFilter::Png, "", "snapshot");

        assert_eq!(picker.starting_folder(), "/home/u");
        assert_eq!(picker.default_filename(), "foo.png");
        assert_eq!(picker.filter(), Some("png"));
        assert_eq!(picker.open_type(), OpenType::Save);
    }

    #[test]
    fn test_context_wins_over_default_path() {
        let contexts = Arc::new(ContextStore::new());
        contexts.store_folder("snapshot", "/tmp/shots");
        let mut picker = FilePickerTask::new(offline_config(), contexts);
        picker.open_load(LoadFilter::Image, "/somewhere/else", "snapshot", false);

        assert_eq!(picker.starting_folder(), "/tmp/shots");
    }

    #[test]
    fn test_folder_resolution_order() {
        let contexts = ContextStore::new();
        let root = if cfg!(windows) { "C:\\" } else { "/" };
        assert_eq!(resolve_folder(&contexts, "x", "", None), root);
        assert_eq!(resolve_folder(&contexts, "x", "", Some(Path::new("/home/u"))), "/home/u");

        contexts.store_folder(SAVE_CONTEXT, "/saved");
        assert_eq!(resolve_folder(&contexts, "x", "", Some(Path::new("/home/u"))), "/saved");
        assert_eq!(resolve_folder(&contexts, "x", "/given", None), "/given");

        contexts.store_folder("x", "/remembered");
        assert_eq!(resolve_folder(&contexts, "x", "/given", None), "/remembered");
    }

    #[test]
    fn test_run_without_open_aborts() {
        let contexts = Arc::new(ContextStore::new());
        let mut task = FilePickerTask::new(offline_config(), contexts).into_task();
        task.run();

        assert!(task.is_aborted());
        assert_eq!(task.failure(), Some(&PickerError::NotOpened));
        assert!(!task.has_filename());
    }

    #[test]
    fn test_missing_launcher_aborts() {
        let contexts = Arc::new(ContextStore::new());
        let mut task = FilePickerTask::new(offline_config(), contexts).into_task();
        task.open_load(LoadFilter::All, "", "openfile", true);
        let outcome = tokio_test::block_on(Engine::default().run_to_completion(&mut task));

        assert_eq!(outcome, TaskOutcome::Aborted);
        assert!(matches!(
            task.failure(),
            Some(PickerError::Plugin(PluginError::LauncherNotFound(_)))
        ));
        // Teardown cleared the filter.
        assert_eq!(task.filter(), None);
    }

    #[test]
    fn test_open_message_fields() {
        let mut picker = FilePickerTask::new(offline_config(), Arc::new(ContextStore::new()));
        picker.open_load(LoadFilter::Wav, "/music", "sounds", true);
        let open = picker.open_message();

        assert!(open.is("basic", "open"));
        assert_eq!(open.value_str("type"), Some("load_multiple"));
        assert_eq!(open.value_str("filter"), Some("wav"));
        assert!(!open.has_value("default"));
        assert_eq!(open.value_str("folder"), Some("/music"));
        assert_eq!(open.value_str("gorgon"), Some("block"));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::plugin::testing::{
            INIT_RESPONSE, PluginScript, SHELL, picker_script, pump_until,
        };
        use serde_json::json;

        fn done(filenames: &[&str]) -> Message {
            Message::new("basic", "done")
                .with_value("perseus", "unblock")
                .with_value("filenames", json!(filenames))
        }

        fn canceled() -> Message {
            Message::new("basic", "canceled").with_value("perseus", "unblock")
        }

        fn config_for(script: &PluginScript) -> PickerConfig {
            let mut config = PickerConfig::new(PluginPaths::new(SHELL, script.dir()));
            config.supervisor = SupervisorSettings {
                launch_timeout: Duration::from_secs(5),
                heartbeat_timeout: None,
            };
            config.poll_interval = Duration::from_millis(5);
            config.home_dir = Some(PathBuf::from("/home/u"));
            config
        }

        fn engine() -> Engine {
            Engine::new(Duration::from_millis(2))
        }

        #[tokio::test]
        async fn test_done_stores_context() {
            let reply = done(&["/tmp/shots/img_003.png"]);
            let script = PluginScript::new(PICKER_PLUGIN, &picker_script(Some(&reply)));
            let mut config = config_for(&script);
            config.window_id = Some(0x2a);
            config.dictionary.insert("save_file_verb".into(), "Speichern".into());
            let contexts = Arc::new(ContextStore::new());

            let mut task = FilePickerTask::new(config, contexts.clone()).into_task();
            task.open_save("img?000.png", SaveFilter::Png, "/tmp/shots", "snapshot");
            assert_eq!(engine().run_to_completion(&mut task).await, TaskOutcome::Finished);

            assert!(!task.is_canceled());
            assert!(task.has_filename());
            assert_eq!(task.filename(), Some("/tmp/shots/img_003.png"));
            assert_eq!(task.folder().as_deref(), Some("/tmp/shots"));
            assert_eq!(contexts.get_folder("snapshot").as_deref(), Some("/tmp/shots"));

            let received = script.received();
            let names: Vec<&str> = received.iter().map(|m| m.name.as_str()).collect();
            assert_eq!(names, vec!["init", "initialization", "open"]);

            let init = &received[1];
            assert_eq!(init.value_str("window_id"), Some("0x2a"));
            let dictionary = init.value("dictionary").and_then(Value::as_object).unwrap();
            assert_eq!(dictionary.len(), DICTIONARY_DEFAULTS.len());
            assert_eq!(dictionary["save_file_verb"], "Speichern");
            assert_eq!(dictionary["all_files"], "All Files");

            let open = &received[2];
            assert_eq!(open.value_str("type"), Some("save"));
            assert_eq!(open.value_str("default"), Some(task.default_filename()));
            assert_eq!(open.value_str("folder"), Some("/tmp/shots"));
            assert_eq!(open.value_str("gorgon"), Some("block"));
        }

        #[tokio::test]
        async fn test_plugin_exit_without_answer_aborts() {
            let script = PluginScript::new(PICKER_PLUGIN, &picker_script(None));
            let contexts = Arc::new(ContextStore::new());
            let mut task = FilePickerTask::new(config_for(&script), contexts.clone()).into_task();
            task.open_load(LoadFilter::Image, "", "openfile", false);

            assert_eq!(engine().run_to_completion(&mut task).await, TaskOutcome::Aborted);
            assert!(!task.has_filename());
            assert!(!task.is_canceled());
            assert_eq!(task.failure(), Some(&PickerError::PluginExited));
            assert!(contexts.is_empty());
        }

        #[tokio::test]
        async fn test_reused_task_runs_are_independent() {
            let reply = done(&["/a/b/one.png"]);
            let script = PluginScript::new(PICKER_PLUGIN, &picker_script(Some(&reply)));
            let contexts = Arc::new(ContextStore::new());
            let mut task = FilePickerTask::new(config_for(&script), contexts.clone()).into_task();

            task.open_save("one.png", SaveFilter::Png, "", "first");
            assert_eq!(engine().run_to_completion(&mut task).await, TaskOutcome::Finished);
            assert_eq!(task.filenames(), ["/a/b/one.png".to_string()]);

            // Without a fresh open() the next run must fail fast.
            assert_eq!(engine().run_to_completion(&mut task).await, TaskOutcome::Aborted);
            assert_eq!(task.failure(), Some(&PickerError::NotOpened));

            script.clear_received();
            std::fs::write(script.path(), picker_script(Some(&canceled()))).unwrap();
            task.open_load(LoadFilter::Xml, "", "second", true);
            assert_eq!(engine().run_to_completion(&mut task).await, TaskOutcome::Finished);

            assert!(task.is_canceled());
            assert!(task.filenames().is_empty());
            assert_eq!(contexts.get_folder("first").as_deref(), Some("/a/b"));
            assert_eq!(contexts.get_folder("second"), None);

            let received = script.received();
            let opens: Vec<&Message> = received.iter().filter(|m| m.name == "open").collect();
            assert_eq!(opens.len(), 1);
            assert_eq!(opens[0].value_str("type"), Some("load_multiple"));
            assert_eq!(opens[0].value_str("filter"), Some("xml"));
            assert_eq!(received.len(), 3);
        }

        /// Records its pid, answers the handshake and never answers `open`
        #[cfg(target_os = "linux")]
        fn unanswering_script() -> String {
            format!(
                r#"printf '%s\n' "$$" > plugin.pid
while IFS= read -r line; do
  printf '%s\n' "$line" >> received.log
  case "$line" in
    *'"name":"init"'*) printf '%s\n' '{INIT_RESPONSE}' ;;
  esac
done
"#
            )
        }

        #[cfg(target_os = "linux")]
        fn process_alive(pid: u32) -> bool {
            match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                // The state letter follows the parenthesised command name.
                Ok(stat) => stat
                    .rsplit_once(')')
                    .is_some_and(|(_, rest)| !rest.trim_start().starts_with(['Z', 'X'])),
                Err(_) => false,
            }
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_abort_mid_run_terminates_plugin() {
            let script = PluginScript::new(PICKER_PLUGIN, &unanswering_script());
            let contexts = Arc::new(ContextStore::new());
            let mut task = FilePickerTask::new(config_for(&script), contexts.clone()).into_task();
            task.open_load(LoadFilter::All, "", "openfile", false);
            assert!(task.run());

            assert!(
                pump_until(|| {
                    task.tick();
                    script.received().iter().any(|m| m.is("basic", "open"))
                })
                .await
            );
            assert_eq!(task.state(), Some(PickerState::PluginRunning));
            let pid: u32 = std::fs::read_to_string(script.dir().join("plugin.pid"))
                .unwrap()
                .trim()
                .parse()
                .unwrap();
            assert!(process_alive(pid));

            task.abort();
            assert!(task.is_aborted());
            assert!(!task.has_filename());
            assert!(!task.is_canceled());
            assert_eq!(task.failure(), None);
            assert_eq!(task.tick(), Step::Done(TaskOutcome::Aborted));
            assert!(contexts.is_empty());

            assert!(pump_until(|| !process_alive(pid)).await);
        }
    }
}
