// crates/wmag-store-sqlite/src/lib.rs
// ============================================================================
// Crate: wmag-store-sqlite
// ============================================================================
//! Durable [`wmag_store::Store`] backend on `SQLite`: WAL journaling, a
//! serialized writer connection, and a pool of read-only connections for
//! read path isolation.

#![forbid(unsafe_code)]

pub mod error;
pub mod schema;
pub mod store;

pub use error::SqliteStoreError;
pub use store::SqliteStore;
pub use store::SqliteStoreConfig;
