// crates/wmag-config/src/lib.rs
// ============================================================================
// Crate: wmag-config
// ============================================================================
//! Environment-driven configuration for the kernel's long-running processes
//! (`wmag-server`, `wmag-worker`, `wmag-cli`).
//!
//! There is no config file format: every setting is a single environment
//! variable, parsed and range-checked once at startup by
//! [`KernelConfig::from_env`]. A missing or malformed setting is a startup
//! error, never a silently applied default, except where spec.md §6 itself
//! names a default.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;

pub use config::KernelConfig;
pub use config::RegistryLayers;
pub use config::StoreBackendConfig;
pub use error::ConfigError;
