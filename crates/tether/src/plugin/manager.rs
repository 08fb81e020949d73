//! Plugin manager
//!
//! Resolves where plugin executables live and owns at most one live
//! [`PluginClient`]. Callers pump it once per tick with [`PluginManager::update`];
//! a client whose process has exited is torn down automatically.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use super::client::{BasicPlugin, PluginClient};
use super::process::SupervisorSettings;

/// Error type for plugin creation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin launcher not found: {0}")]
    LauncherNotFound(PathBuf),

    #[error("Plugin executable not found: {0}")]
    PluginNotFound(PathBuf),

    #[error("Plugin {0} failed to start")]
    InitFailed(String),

    #[error("Plugin {0} is busy and cannot be replaced")]
    Busy(String),
}

/// Location of the launcher and of the plugin executables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginPaths {
    pub launcher: PathBuf,
    pub plugin_dir: PathBuf,
}

impl PluginPaths {
    pub fn new(launcher: impl Into<PathBuf>, plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            launcher: launcher.into(),
            plugin_dir: plugin_dir.into(),
        }
    }

    /// Full path of the executable for a plugin basename
    pub fn plugin_file(&self, basename: &str) -> PathBuf {
        self.plugin_dir
            .join(format!("{}{}", basename, std::env::consts::EXE_SUFFIX))
    }
}

/// Called with every creation failure
pub type FailureHook = Box<dyn FnMut(&PluginError) + Send>;

/// Factory and owner of a single plugin client
pub struct PluginManager<P: BasicPlugin> {
    paths: PluginPaths,
    settings: SupervisorSettings,
    client: Option<PluginClient<P>>,
    pending_destroy: bool,
    on_failure: Option<FailureHook>,
}

impl<P: BasicPlugin> PluginManager<P> {
    pub fn new(paths: PluginPaths, settings: SupervisorSettings) -> Self {
        Self {
            paths,
            settings,
            client: None,
            pending_destroy: false,
            on_failure: None,
        }
    }

    pub fn with_failure_hook(mut self, hook: impl FnMut(&PluginError) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    pub fn paths(&self) -> &PluginPaths {
        &self.paths
    }

    /// Start a new client for `plugin`, replacing any existing one.
    ///
    /// Both the launcher and the plugin executable must exist; otherwise no
    /// process is spawned and the failure hook is invoked. An existing client
    /// protected by its delete guard is kept and [`PluginError::Busy`] returned.
    pub fn create_plugin(&mut self, plugin: P) -> Result<&mut PluginClient<P>, PluginError> {
        if self.client.is_some() {
            debug!("Replacing existing {} client", P::plugin_basename());
            if !self.destroy_plugin() {
                return Err(self.fail(PluginError::Busy(P::plugin_basename().to_string())));
            }
        }

        let launcher = self.paths.launcher.clone();
        if !launcher.is_file() {
            return Err(self.fail(PluginError::LauncherNotFound(launcher)));
        }
        let plugin_file = self.paths.plugin_file(P::plugin_basename());
        if !plugin_file.is_file() {
            return Err(self.fail(PluginError::PluginNotFound(plugin_file)));
        }

        let mut client = PluginClient::new(plugin, self.settings.clone());
        if !client.init(&launcher, &self.paths.plugin_dir, &plugin_file) {
            return Err(self.fail(PluginError::InitFailed(P::plugin_basename().to_string())));
        }

        info!("Created plugin {} from {}", P::plugin_basename(), plugin_file.display());
        Ok(self.client.insert(client))
    }

    fn fail(&mut self, err: PluginError) -> PluginError {
        error!("{}", err);
        if let Some(hook) = self.on_failure.as_mut() {
            hook(&err);
        }
        err
    }

    /// Tear down the client. Idempotent.
    ///
    /// Returns false when the client is protected by its delete guard; the
    /// teardown then happens in a later [`update`](Self::update).
    pub fn destroy_plugin(&mut self) -> bool {
        let Some(client) = self.client.as_ref() else {
            self.pending_destroy = false;
            return true;
        };
        if !client.delete_ok() {
            debug!("Deferring teardown of {}, delete guard is set", P::plugin_basename());
            self.pending_destroy = true;
            return false;
        }
        if let Some(mut client) = self.client.take() {
            client.reset();
            debug!("Destroyed plugin {}", P::plugin_basename());
        }
        self.pending_destroy = false;
        true
    }

    /// One scheduler tick
    pub fn update(&mut self) {
        let Some(client) = self.client.as_mut() else {
            return;
        };
        client.idle();
        if client.is_exited() || self.pending_destroy {
            self.destroy_plugin();
        }
    }

    pub fn has_plugin(&self) -> bool {
        self.client.is_some()
    }

    pub fn client(&self) -> Option<&PluginClient<P>> {
        self.client.as_ref()
    }

    pub fn client_mut(&mut self) -> Option<&mut PluginClient<P>> {
        self.client.as_mut()
    }

    pub fn plugin(&self) -> Option<&P> {
        self.client.as_ref().map(PluginClient::plugin)
    }

    pub fn plugin_mut(&mut self) -> Option<&mut P> {
        self.client.as_mut().map(PluginClient::plugin_mut)
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.paths.plugin_dir
    }
}

impl<P: BasicPlugin> Drop for PluginManager<P> {
    fn drop(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Stub {
        tag: u32,
    }

    impl BasicPlugin for Stub {
        fn plugin_basename() -> &'static str {
            "stub"
        }

        fn receive_plugin_message(&mut self, _message: &Message) -> bool {
            true
        }
    }

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            launch_timeout: Duration::from_secs(5),
            heartbeat_timeout: None,
        }
    }

    #[test]
    fn test_plugin_file_uses_basename() {
        let paths = PluginPaths::new("/opt/tether/launcher", "/opt/tether/plugins");
        let expected = format!("stub{}", std::env::consts::EXE_SUFFIX);
        assert_eq!(paths.plugin_file("stub"), Path::new("/opt/tether/plugins").join(expected));
    }

    #[test]
    fn test_missing_launcher_reports_failure() {
        let dir = TempDir::new().unwrap();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let seen = failures.clone();
        let mut manager = PluginManager::<Stub>::new(
            PluginPaths::new(dir.path().join("launcher"), dir.path()),
            settings(),
        )
        .with_failure_hook(move |err| seen.lock().unwrap().push(err.clone()));

        let err = manager.create_plugin(Stub::default()).err().unwrap();
        assert!(matches!(err, PluginError::LauncherNotFound(_)));
        assert_eq!(failures.lock().unwrap().as_slice(), &[err]);
        assert!(!manager.has_plugin());
    }

    #[test]
    fn test_missing_plugin_file_reports_failure() {
        let dir = TempDir::new().unwrap();
        let launcher = dir.path().join("launcher");
        std::fs::write(&launcher, b"").unwrap();
        let mut manager =
            PluginManager::<Stub>::new(PluginPaths::new(&launcher, dir.path()), settings());

        let err = manager.create_plugin(Stub::default()).err().unwrap();
        assert_eq!(err, PluginError::PluginNotFound(manager.paths().plugin_file("stub")));
        assert!(!manager.has_plugin());
    }

    #[test]
    fn test_destroy_without_client_is_noop() {
        let mut manager = PluginManager::<Stub>::new(PluginPaths::new("/x", "/y"), settings());
        assert!(manager.destroy_plugin());
        assert!(manager.destroy_plugin());
        manager.update();
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::plugin::testing::{
            ECHO_PLUGIN, HANDSHAKE_THEN_EXIT, PluginScript, SHELL, pump_until,
        };

        fn manager_for(script: &PluginScript) -> PluginManager<Stub> {
            PluginManager::new(PluginPaths::new(SHELL, script.dir()), settings())
        }

        #[tokio::test]
        async fn test_exited_client_is_destroyed_on_update() {
            let script = PluginScript::new("stub", HANDSHAKE_THEN_EXIT);
            let mut manager = manager_for(&script);
            assert!(manager.create_plugin(Stub::default()).is_ok());

            assert!(
                pump_until(|| {
                    manager.update();
                    !manager.has_plugin()
                })
                .await
            );
        }

        #[tokio::test]
        async fn test_delete_guard_defers_teardown() {
            let script = PluginScript::new("stub", ECHO_PLUGIN);
            let mut manager = manager_for(&script);
            manager.create_plugin(Stub::default()).unwrap().set_delete_ok(false);

            assert!(!manager.destroy_plugin());
            assert!(manager.has_plugin());
            manager.update();
            assert!(manager.has_plugin());

            manager.client_mut().unwrap().set_delete_ok(true);
            manager.update();
            assert!(!manager.has_plugin());
        }

        #[tokio::test]
        async fn test_create_replaces_previous_client() {
            let script = PluginScript::new("stub", ECHO_PLUGIN);
            let mut manager = manager_for(&script);
            manager.create_plugin(Stub::default()).unwrap().plugin_mut().tag = 1;
            let client = manager.create_plugin(Stub::default()).unwrap();

            assert_eq!(client.plugin().tag, 0);
            assert!(client.is_loading());
        }

        #[tokio::test]
        async fn test_create_refuses_to_replace_guarded_client() {
            let script = PluginScript::new("stub", ECHO_PLUGIN);
            let failures = Arc::new(Mutex::new(Vec::new()));
            let seen = failures.clone();
            let mut manager = manager_for(&script)
                .with_failure_hook(move |err| seen.lock().unwrap().push(err.clone()));
            let guarded = manager.create_plugin(Stub::default()).unwrap();
            guarded.set_delete_ok(false);
            guarded.plugin_mut().tag = 7;

            let err = manager.create_plugin(Stub::default()).err().unwrap();
            assert_eq!(err, PluginError::Busy("stub".to_string()));
            assert_eq!(failures.lock().unwrap().as_slice(), &[err]);

            let client = manager.client().unwrap();
            assert_eq!(client.plugin().tag, 7);
            assert!(!client.delete_ok());
            assert!(!client.is_exited());
        }
    }
}
