//! Purpose: Abstract runtime-host seam plus the platform property set handed
//! to it at boot.
//! Exports: `PlatformProperties`, property-name constants, `RuntimeHost`,
//! `EphemeralHost`.
//! Invariants: `PlatformProperties` preserves insertion order; a re-set name
//! keeps its original position.
//! Invariants: `RuntimeHost` is object-safe; the embedder never names a
//! concrete framework.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::core::error::{Error, ErrorKind};
use crate::core::registry::ServiceRegistry;

pub const PROP_INSTALL_AREA: &str = "install.area";
pub const PROP_SYSTEM_PATH: &str = "system.path";
pub const PROP_CONFIGURATION_AREA: &str = "configuration.area";
pub const PROP_BUNDLES: &str = "bundles";
pub const PROP_PARENT_LOADER: &str = "parent.loader";
pub const PROP_EXTRA_CAPABILITIES: &str = "system.capabilities.extra";

/// Insertion-ordered name/value pairs computed once during start and
/// read-only afterward.
#[derive(Clone, Debug, Default)]
pub struct PlatformProperties {
    entries: Vec<(String, String)>,
}

impl PlatformProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Seam between the embedder and whatever plugin framework actually runs.
/// `boot` hands back the service registry of the live instance;
/// `start_bundle` is a transient start that must not persist any auto-start
/// marking.
pub trait RuntimeHost: Send {
    fn boot(
        &mut self,
        properties: &PlatformProperties,
        args: &[String],
    ) -> Result<Arc<ServiceRegistry>, Error>;

    fn shutdown(&mut self) -> Result<(), Error>;

    fn list_bundles(&self) -> Vec<String>;

    fn start_bundle(&mut self, symbolic_name: &str) -> Result<(), Error>;
}

/// Lets a caller hand a host to the embedder while keeping a handle on it.
impl<H: RuntimeHost> RuntimeHost for Arc<Mutex<H>> {
    fn boot(
        &mut self,
        properties: &PlatformProperties,
        args: &[String],
    ) -> Result<Arc<ServiceRegistry>, Error> {
        self.lock().expect("host lock poisoned").boot(properties, args)
    }

    fn shutdown(&mut self) -> Result<(), Error> {
        self.lock().expect("host lock poisoned").shutdown()
    }

    fn list_bundles(&self) -> Vec<String> {
        self.lock().expect("host lock poisoned").list_bundles()
    }

    fn start_bundle(&mut self, symbolic_name: &str) -> Result<(), Error> {
        self.lock().expect("host lock poisoned").start_bundle(symbolic_name)
    }
}

/// In-memory host: a fresh registry per boot, caller-seeded bundle names,
/// recorded activations. Concrete enough for local embedding and the
/// lifecycle tests; a real framework adapter implements the same trait
/// out of tree.
#[derive(Default)]
pub struct EphemeralHost {
    installed: Vec<String>,
    started: Vec<String>,
    failing_bundles: BTreeSet<String>,
    fail_next_boot: bool,
    fail_shutdown: bool,
    registry: Option<Arc<ServiceRegistry>>,
    last_properties: Option<PlatformProperties>,
    last_args: Vec<String>,
    boot_count: u32,
}

impl EphemeralHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundles(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            installed: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Marks a bundle so its transient start fails, for exercising the
    /// best-effort activation path.
    pub fn fail_bundle(&mut self, symbolic_name: impl Into<String>) {
        self.failing_bundles.insert(symbolic_name.into());
    }

    pub fn fail_next_boot(&mut self) {
        self.fail_next_boot = true;
    }

    pub fn fail_shutdown(&mut self) {
        self.fail_shutdown = true;
    }

    pub fn is_booted(&self) -> bool {
        self.registry.is_some()
    }

    pub fn started_bundles(&self) -> &[String] {
        &self.started
    }

    pub fn last_properties(&self) -> Option<&PlatformProperties> {
        self.last_properties.as_ref()
    }

    pub fn last_args(&self) -> &[String] {
        &self.last_args
    }

    pub fn boot_count(&self) -> u32 {
        self.boot_count
    }
}

impl RuntimeHost for EphemeralHost {
    fn boot(
        &mut self,
        properties: &PlatformProperties,
        args: &[String],
    ) -> Result<Arc<ServiceRegistry>, Error> {
        if self.fail_next_boot {
            self.fail_next_boot = false;
            return Err(Error::new(ErrorKind::Startup).with_message("boot refused"));
        }
        let registry = Arc::new(ServiceRegistry::new());
        self.boot_count += 1;
        self.registry = Some(Arc::clone(&registry));
        self.last_properties = Some(properties.clone());
        self.last_args = args.to_vec();
        self.started.clear();
        Ok(registry)
    }

    fn shutdown(&mut self) -> Result<(), Error> {
        self.registry = None;
        if self.fail_shutdown {
            self.fail_shutdown = false;
            return Err(Error::new(ErrorKind::Shutdown).with_message("shutdown refused"));
        }
        Ok(())
    }

    fn list_bundles(&self) -> Vec<String> {
        self.installed.clone()
    }

    fn start_bundle(&mut self, symbolic_name: &str) -> Result<(), Error> {
        if self.failing_bundles.contains(symbolic_name) {
            return Err(Error::new(ErrorKind::Startup)
                .with_message(format!("could not start bundle {symbolic_name}")));
        }
        if !self.installed.iter().any(|name| name == symbolic_name) {
            return Err(Error::new(ErrorKind::Startup)
                .with_message(format!("bundle {symbolic_name} is not installed")));
        }
        self.started.push(symbolic_name.to_string());
        Ok(())
    }
}
