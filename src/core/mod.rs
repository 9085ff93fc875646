// Core modules implementing lifecycle, locking, resolution, and error modeling.
pub mod bundle;
pub mod config;
pub mod embedder;
pub mod error;
pub mod host;
pub mod lock;
pub mod registry;
