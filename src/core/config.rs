//! Purpose: Immutable embedder configuration plus the collaborator services
//! registered at runtime start.
//! Exports: `RuntimeConfig`, `RuntimeConfigBuilder`, `HostLogger`,
//! `TracingLogger`, `BuildContext`, `RepositorySettings`.
//! Invariants: `RuntimeConfig` never changes after the embedder is built.
//! Invariants: Logging is an explicit capability, not process-global state.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Logging capability handed to the embedder at construction. The
/// `debug_enabled` state decides whether the runtime is booted with its
/// debug startup flags.
pub trait HostLogger: Send + Sync {
    fn debug_enabled(&self) -> bool;
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default logger: forwards to `tracing`, debug state taken at construction.
pub struct TracingLogger {
    debug: bool,
}

impl TracingLogger {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }
}

impl HostLogger for TracingLogger {
    fn debug_enabled(&self) -> bool {
        self.debug
    }

    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }
}

#[derive(Clone)]
pub struct RuntimeConfig {
    install_root: PathBuf,
    extra_bundle_locations: BTreeSet<PathBuf>,
    extra_capabilities: Vec<String>,
    repository_path: PathBuf,
    offline: bool,
    logger: Arc<dyn HostLogger>,
}

impl RuntimeConfig {
    pub fn builder(install_root: impl Into<PathBuf>) -> RuntimeConfigBuilder {
        RuntimeConfigBuilder {
            install_root: install_root.into(),
            extra_bundle_locations: BTreeSet::new(),
            extra_capabilities: Vec::new(),
            repository_path: None,
            offline: false,
            logger: None,
        }
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn extra_bundle_locations(&self) -> &BTreeSet<PathBuf> {
        &self.extra_bundle_locations
    }

    pub fn extra_capabilities(&self) -> &[String] {
        &self.extra_capabilities
    }

    pub fn repository_path(&self) -> &Path {
        &self.repository_path
    }

    pub fn offline(&self) -> bool {
        self.offline
    }

    pub fn logger(&self) -> &Arc<dyn HostLogger> {
        &self.logger
    }
}

pub struct RuntimeConfigBuilder {
    install_root: PathBuf,
    extra_bundle_locations: BTreeSet<PathBuf>,
    extra_capabilities: Vec<String>,
    repository_path: Option<PathBuf>,
    offline: bool,
    logger: Option<Arc<dyn HostLogger>>,
}

impl RuntimeConfigBuilder {
    pub fn extra_bundle_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.extra_bundle_locations.insert(location.into());
        self
    }

    pub fn extra_capability(mut self, name: impl Into<String>) -> Self {
        self.extra_capabilities.push(name.into());
        self
    }

    pub fn repository_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.repository_path = Some(path.into());
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn HostLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> RuntimeConfig {
        let repository_path = self
            .repository_path
            .unwrap_or_else(|| self.install_root.join("repository"));
        RuntimeConfig {
            install_root: self.install_root,
            extra_bundle_locations: self.extra_bundle_locations,
            extra_capabilities: self.extra_capabilities,
            repository_path,
            offline: self.offline,
            logger: self
                .logger
                .unwrap_or_else(|| Arc::new(TracingLogger::new(false))),
        }
    }
}

/// Build context registered as a service at start. Pass-through values for
/// consumers inside the runtime; the embedder never interprets them.
#[derive(Clone, Debug)]
pub struct BuildContext {
    pub repository_path: PathBuf,
    pub offline: bool,
    pub global_properties: BTreeMap<String, String>,
}

impl BuildContext {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            repository_path: config.repository_path().to_path_buf(),
            offline: config.offline(),
            global_properties: BTreeMap::new(),
        }
    }
}

/// Repository-settings provider registered as a service at start. Mirror and
/// credential resolution are not configured in this embedder, so lookups
/// always answer "none".
#[derive(Clone, Copy, Debug, Default)]
pub struct RepositorySettings;

impl RepositorySettings {
    pub fn mirror_for(&self, _repository_url: &str) -> Option<String> {
        None
    }

    pub fn credentials_for(&self, _repository_id: &str) -> Option<(String, String)> {
        None
    }
}
