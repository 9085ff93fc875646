//! Purpose: Shared core library crate used by the `plinth` CLI and tests.
//! Exports: `core` (embedder lifecycle, bundle resolution, file locking,
//! service registry, errors) and the stable `api` facade.
//! Invariants: The embedded framework is reached only through the
//! `RuntimeHost` seam; nothing here names a concrete plugin framework.
pub mod api;
pub mod core;
