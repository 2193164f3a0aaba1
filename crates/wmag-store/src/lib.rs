// crates/wmag-store/src/lib.rs
// ============================================================================
// Crate: wmag-store
// ============================================================================
//! Backend-agnostic persistence contract ([`Store`]) plus an in-memory
//! [`EphemeralStore`] reference implementation used for tests and local
//! development. `wmag-store-sqlite` provides the durable backend.

#![forbid(unsafe_code)]

pub mod ephemeral;
pub mod error;
pub mod traits;

pub use ephemeral::EphemeralStore;
pub use error::StoreError;
pub use traits::Store;
