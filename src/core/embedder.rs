//! Purpose: Own the full lifecycle of one embedded plugin-runtime instance.
//! Exports: `RuntimeEmbedder`, `StartReport`, `ShutdownReport`,
//! `ActivationEntry`, `ACTIVATION_ORDER`.
//! Invariants: One mutex spans the entire start sequence; concurrent callers
//! never observe a half-initialized runtime.
//! Invariants: A failed start leaves the embedder stopped with no staged
//! temp state behind.
//! Invariants: `close` is idempotent, runs past partial failures, and always
//! removes the temp work area and secure-storage file.

use std::any::Any;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::bundle::{self, PLUGINS_DIR};
use crate::core::config::{BuildContext, RepositorySettings, RuntimeConfig};
use crate::core::error::{Error, ErrorKind};
use crate::core::host::{
    PlatformProperties, RuntimeHost, PROP_BUNDLES, PROP_CONFIGURATION_AREA,
    PROP_EXTRA_CAPABILITIES, PROP_INSTALL_AREA, PROP_PARENT_LOADER, PROP_SYSTEM_PATH,
};
use crate::core::lock::FileLockService;
use crate::core::registry::ServiceRegistry;

pub const CONFIGURATION_DIR: &str = "configuration";
pub const CONFIGURATION_FILE: &str = "config.ini";

const KEYRING_ARG: &str = "-keyring";
const DEBUG_ARG: &str = "-debug";
const CONSOLE_LOG_ARG: &str = "-console-log";

/// One entry of the post-boot activation pass.
#[derive(Clone, Copy, Debug)]
pub struct ActivationEntry {
    pub symbolic_name: &'static str,
    pub required: bool,
}

/// Bundles whose activators must run before dependent service consumers,
/// in an order the resolver alone does not guarantee. All entries are
/// best-effort; a failure is collected, not escalated.
pub const ACTIVATION_ORDER: &[ActivationEntry] = &[
    ActivationEntry {
        symbolic_name: "org.eclipse.equinox.ds",
        required: false,
    },
    ActivationEntry {
        symbolic_name: "org.eclipse.equinox.registry",
        required: false,
    },
    ActivationEntry {
        symbolic_name: "org.eclipse.core.net",
        required: false,
    },
];

#[derive(Debug)]
pub struct ActivationWarning {
    pub symbolic_name: String,
    pub error: Error,
}

/// Outcome of a successful start. Warnings cover bundles that failed their
/// best-effort activation.
#[derive(Debug, Default)]
pub struct StartReport {
    pub activation_warnings: Vec<ActivationWarning>,
}

/// Outcome of `close`. Never an error: shutdown and cleanup failures are
/// collected here and reported, cleanup always runs to the end.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub warnings: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Staged temp state for one live runtime: a private copy of the
/// configuration file plus the secure-storage placeholder. Exclusively
/// owned; removed unconditionally on close.
struct TempWorkArea {
    root: PathBuf,
    configuration_area: PathBuf,
    secure_storage: PathBuf,
}

impl TempWorkArea {
    fn create(install_root: &Path) -> Result<Self, Error> {
        let root = tempfile::Builder::new()
            .prefix("plinth-")
            .tempdir()
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("could not create staging directory")
                    .with_source(err)
            })?
            .keep();

        let configuration_area = root.join("config");
        std::fs::create_dir(&configuration_area).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("could not create staged configuration directory")
                .with_path(&configuration_area)
                .with_source(err)
        })?;

        let source = install_root.join(CONFIGURATION_DIR).join(CONFIGURATION_FILE);
        let staged = configuration_area.join(CONFIGURATION_FILE);
        std::fs::copy(&source, &staged).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("could not stage configuration file")
                .with_path(&source)
                .with_source(err)
        })?;

        let secure_storage = root.join("secure-storage");
        File::create(&secure_storage).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("could not create secure-storage placeholder")
                .with_path(&secure_storage)
                .with_source(err)
        })?;

        Ok(Self {
            root,
            configuration_area,
            secure_storage,
        })
    }

    fn remove(self, warnings: &mut Vec<String>) {
        if let Err(err) = std::fs::remove_file(&self.secure_storage) {
            warnings.push(format!(
                "could not remove secure-storage file {}: {err}",
                self.secure_storage.display()
            ));
        }
        remove_tree_bottom_up(&self.root, warnings);
    }
}

/// Deepest entries first, so non-empty directories can be removed; every
/// failure is reported and the walk continues.
fn remove_tree_bottom_up(path: &Path, warnings: &mut Vec<String>) {
    if path.is_dir() {
        match std::fs::read_dir(path) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    remove_tree_bottom_up(&entry.path(), warnings);
                }
            }
            Err(err) => {
                warnings.push(format!("could not list {}: {err}", path.display()));
            }
        }
        if let Err(err) = std::fs::remove_dir(path) {
            warnings.push(format!("could not remove {}: {err}", path.display()));
        }
    } else if let Err(err) = std::fs::remove_file(path) {
        if path.exists() {
            warnings.push(format!("could not remove {}: {err}", path.display()));
        }
    }
}

struct Inner {
    host: Box<dyn RuntimeHost>,
    registry: Option<Arc<ServiceRegistry>>,
    work_area: Option<TempWorkArea>,
}

pub struct RuntimeEmbedder {
    config: RuntimeConfig,
    file_lock_service: Arc<FileLockService>,
    inner: Mutex<Inner>,
}

impl RuntimeEmbedder {
    pub fn new(config: RuntimeConfig, host: Box<dyn RuntimeHost>) -> Self {
        Self {
            config,
            file_lock_service: Arc::new(FileLockService::new()),
            inner: Mutex::new(Inner {
                host,
                registry: None,
                work_area: None,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn file_lock_service(&self) -> Arc<FileLockService> {
        Arc::clone(&self.file_lock_service)
    }

    pub fn is_running(&self) -> bool {
        self.lock_inner().registry.is_some()
    }

    /// Starts the runtime. A second call while running is a no-op with an
    /// empty report.
    pub fn start(&self) -> Result<StartReport, Error> {
        let mut inner = self.lock_inner();
        self.start_locked(&mut inner)
    }

    /// Looks up a service by capability type, starting the runtime first if
    /// needed. The returned handle lives as long as the runtime; there is no
    /// explicit release.
    pub fn get_service<T: Any + Send + Sync>(
        &self,
        filter: Option<&str>,
    ) -> Result<Arc<T>, Error> {
        let mut inner = self.lock_inner();
        if inner.registry.is_none() {
            self.start_locked(&mut inner)?;
        }
        let registry = inner.registry.as_ref().expect("running after start");
        registry.get::<T>(filter)
    }

    /// Registers a service with the live runtime. Valid only while running.
    pub fn register_service<T: Any + Send + Sync>(
        &self,
        instance: Arc<T>,
        properties: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let inner = self.lock_inner();
        let registry = inner.registry.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Config)
                .with_message("cannot register a service while the runtime is not running")
        })?;
        registry.register(instance, properties);
        Ok(())
    }

    /// Shuts the runtime down and removes all staged temp state. Safe to
    /// call repeatedly and after a failed start; failures are reported, not
    /// raised, and never short-circuit the remaining cleanup.
    pub fn close(&self) -> ShutdownReport {
        let mut inner = self.lock_inner();
        let mut report = ShutdownReport::default();

        if inner.registry.is_some() {
            if let Err(err) = inner.host.shutdown() {
                let warning = format!("runtime shutdown failed: {err}");
                self.config.logger().error(&warning);
                report.warnings.push(warning);
            }
            inner.registry = None;
        }

        if let Some(work_area) = inner.work_area.take() {
            work_area.remove(&mut report.warnings);
        }

        for warning in &report.warnings {
            tracing::warn!("{warning}");
        }
        report
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("embedder state lock poisoned")
    }

    fn start_locked(&self, inner: &mut Inner) -> Result<StartReport, Error> {
        if inner.registry.is_some() {
            return Ok(StartReport::default());
        }

        let install_root = self.config.install_root();
        let work_area = TempWorkArea::create(install_root)?;

        match self.boot_with(inner, &work_area) {
            Ok((registry, report)) => {
                inner.registry = Some(registry);
                inner.work_area = Some(work_area);
                for warning in &report.activation_warnings {
                    let message = format!(
                        "could not start bundle {}: {}",
                        warning.symbolic_name, warning.error
                    );
                    self.config.logger().warn(&message);
                    tracing::warn!("{message}");
                }
                Ok(report)
            }
            Err(err) => {
                // No partial running state: drop the staged area before
                // surfacing the failure.
                let mut warnings = Vec::new();
                work_area.remove(&mut warnings);
                for warning in warnings {
                    self.config.logger().warn(&warning);
                }
                Err(err)
            }
        }
    }

    fn boot_with(
        &self,
        inner: &mut Inner,
        work_area: &TempWorkArea,
    ) -> Result<(Arc<ServiceRegistry>, StartReport), Error> {
        let properties = self.platform_properties(work_area)?;
        let args = self.startup_args(work_area);

        let registry = inner.host.boot(&properties, &args).map_err(|err| {
            Error::new(ErrorKind::Startup)
                .with_message("embedded runtime failed to boot")
                .with_source(err)
        })?;

        let report = self.activate_in_working_order(inner)?;

        registry.register(Arc::new(RepositorySettings), BTreeMap::new());
        registry.register(Arc::new(BuildContext::new(&self.config)), BTreeMap::new());
        registry.register(Arc::clone(&self.file_lock_service), BTreeMap::new());

        Ok((registry, report))
    }

    fn platform_properties(&self, work_area: &TempWorkArea) -> Result<PlatformProperties, Error> {
        let install_root = self.config.install_root();
        let mut properties = PlatformProperties::new();
        properties.set(PROP_INSTALL_AREA, install_root.display().to_string());
        properties.set(
            PROP_SYSTEM_PATH,
            install_root.join(PLUGINS_DIR).display().to_string(),
        );
        properties.set(
            PROP_CONFIGURATION_AREA,
            work_area.configuration_area.display().to_string(),
        );
        properties.set(
            PROP_BUNDLES,
            bundle::reference_string(install_root, self.config.extra_bundle_locations())?,
        );
        // The host loads framework classes through the embedding process,
        // so registered services and their consumers share types.
        properties.set(PROP_PARENT_LOADER, "host");
        properties.set(
            PROP_EXTRA_CAPABILITIES,
            self.config.extra_capabilities().join(","),
        );
        Ok(properties)
    }

    fn startup_args(&self, work_area: &TempWorkArea) -> Vec<String> {
        let mut args = vec![
            KEYRING_ARG.to_string(),
            work_area.secure_storage.display().to_string(),
        ];
        if self.config.logger().debug_enabled() {
            args.push(DEBUG_ARG.to_string());
            args.push(CONSOLE_LOG_ARG.to_string());
        }
        args
    }

    /// Transiently starts every installed bundle matching each entry of
    /// `ACTIVATION_ORDER`, in order. Failures on non-required entries are
    /// collected; a required entry's failure aborts the start.
    fn activate_in_working_order(&self, inner: &mut Inner) -> Result<StartReport, Error> {
        let mut report = StartReport::default();
        for entry in ACTIVATION_ORDER {
            let installed = inner.host.list_bundles();
            for name in installed
                .iter()
                .filter(|name| name.as_str() == entry.symbolic_name)
            {
                if let Err(err) = inner.host.start_bundle(name) {
                    if entry.required {
                        let _ = inner.host.shutdown();
                        return Err(Error::new(ErrorKind::Startup)
                            .with_message(format!("required bundle {name} failed to start"))
                            .with_source(err));
                    }
                    report.activation_warnings.push(ActivationWarning {
                        symbolic_name: name.clone(),
                        error: err,
                    });
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::remove_tree_bottom_up;

    #[test]
    fn bottom_up_removal_clears_nested_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("work");
        std::fs::create_dir_all(root.join("a").join("b")).expect("dirs");
        std::fs::write(root.join("a").join("b").join("f.txt"), b"x").expect("file");
        std::fs::write(root.join("top.txt"), b"y").expect("file");

        let mut warnings = Vec::new();
        remove_tree_bottom_up(&root, &mut warnings);
        assert!(warnings.is_empty(), "{warnings:?}");
        assert!(!root.exists());
    }

    #[test]
    fn removal_of_missing_path_is_silent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut warnings = Vec::new();
        remove_tree_bottom_up(&dir.path().join("ghost"), &mut warnings);
        assert!(warnings.is_empty());
    }
}
