//! Purpose: Define the stable public Rust API boundary for Plinth.
//! Exports: Embedder lifecycle, runtime-host seam, file locking, errors.
//! Role: Public, additive-only surface; internal module layout may shift
//! underneath it.

pub use crate::core::bundle::{
    reference_string, resolve_bundles, BundleReference, FRAMEWORK_BUNDLE_PREFIX, PLUGINS_DIR,
};
pub use crate::core::config::{
    BuildContext, HostLogger, RepositorySettings, RuntimeConfig, RuntimeConfigBuilder,
    TracingLogger,
};
pub use crate::core::embedder::{
    ActivationEntry, ActivationWarning, RuntimeEmbedder, ShutdownReport, StartReport,
    ACTIVATION_ORDER, CONFIGURATION_DIR, CONFIGURATION_FILE,
};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::host::{EphemeralHost, PlatformProperties, RuntimeHost};
pub use crate::core::lock::{FileLockService, LockHandle, RetryPolicy, LOCK_MARKER_SUFFIX};
pub use crate::core::registry::ServiceRegistry;
