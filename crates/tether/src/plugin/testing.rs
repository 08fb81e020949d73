//! Shell-script stand-ins for plugin executables used by unit tests

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use crate::message::Message;

pub const SHELL: &str = "/bin/sh";

pub const INIT_RESPONSE: &str = r#"{"class":"base","name":"init_response","versions":{"base":"1.0","basic":"1.0"},"plugin_version":"test"}"#;

/// Answers the handshake, then echoes every frame back
pub const ECHO_PLUGIN: &str = r#"while IFS= read -r line; do
  case "$line" in
    *'"name":"init"'*) printf '%s\n' '{"class":"base","name":"init_response","versions":{"base":"1.0","basic":"1.0"},"plugin_version":"test"}' ;;
    *) printf '%s\n' "$line" ;;
  esac
done
"#;

/// Answers the handshake and nothing else, except `basic/release`, which is
/// answered with `perseus:"unblock"`
pub const SILENT_PLUGIN: &str = r#"while IFS= read -r line; do
  case "$line" in
    *'"name":"init"'*) printf '%s\n' '{"class":"base","name":"init_response","versions":{"base":"1.0","basic":"1.0"},"plugin_version":"test"}' ;;
    *'"name":"release"'*) printf '%s\n' '{"class":"basic","name":"released","perseus":"unblock"}' ;;
  esac
done
"#;

/// Answers the handshake, says goodbye and exits
pub const HANDSHAKE_THEN_EXIT: &str = r#"IFS= read -r line
printf '%s\n' '{"class":"base","name":"init_response","versions":{"base":"1.0","basic":"1.0"},"plugin_version":"test"}'
printf '%s\n' '{"class":"basic","name":"bye"}'
exit 0
"#;

/// Script that records every received frame to `received.log` in its working
/// directory and answers `basic/open` with `reply` (or just exits when `None`)
pub fn picker_script(reply: Option<&Message>) -> String {
    let on_open = match reply {
        Some(message) => {
            let frame = message.to_frame().unwrap_or_default();
            let text = String::from_utf8_lossy(&frame).trim_end().to_string();
            format!(
                "printf '%s\\n' '{text}'\n      printf '%s\\n' '{{\"class\":\"base\",\"name\":\"shutdown\"}}'\n      exit 0"
            )
        }
        None => String::from("exit 3"),
    };
    format!(
        r#"while IFS= read -r line; do
  printf '%s\n' "$line" >> received.log
  case "$line" in
    *'"name":"init"'*) printf '%s\n' '{INIT_RESPONSE}' ;;
    *'"name":"open"'*)
      {on_open} ;;
  esac
done
"#
    )
}

/// A script written into a fresh temporary plugin directory
pub struct PluginScript {
    dir: TempDir,
    path: PathBuf,
}

impl PluginScript {
    pub fn new(file_name: &str, body: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(file_name);
        std::fs::write(&path, body).unwrap();
        Self { dir, path }
    }

    pub fn launcher(&self) -> &Path {
        Path::new(SHELL)
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_arg(&self) -> String {
        self.path.display().to_string()
    }

    /// Frames the script wrote to `received.log`
    pub fn received(&self) -> Vec<Message> {
        std::fs::read_to_string(self.dir.path().join("received.log"))
            .unwrap_or_default()
            .lines()
            .filter_map(|line| Message::from_frame(line.as_bytes()).ok())
            .collect()
    }

    pub fn clear_received(&self) {
        let _ = std::fs::remove_file(self.dir.path().join("received.log"));
    }
}

/// Call `step` every few milliseconds for `duration`; false as soon as it does
pub async fn pump_while(duration: Duration, mut step: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + duration;
    while std::time::Instant::now() < deadline {
        if !step() {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}

/// Call `step` every few milliseconds until it returns true (about 5 s max)
pub async fn pump_until(mut step: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if step() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
