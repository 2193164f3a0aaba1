// crates/wmag-streamer/src/lib.rs
// ============================================================================
// Crate: wmag-streamer
// ============================================================================
//! The live subscription layer: a per-run bus of bounded per-subscriber
//! channels ([`bus::RunBus`]), and a replay-then-tail combinator
//! ([`streamer::Streamer`]) that lets a client join mid-run at any
//! `since_seq` cursor without missing or duplicating events.

#![forbid(unsafe_code)]

pub mod bus;
pub mod error;
pub mod streamer;

pub use bus::RunBus;
pub use bus::SubscriberId;
pub use error::StreamerError;
pub use streamer::DEFAULT_HEARTBEAT_INTERVAL;
pub use streamer::Frame;
pub use streamer::Streamer;
