// crates/wmag-core/src/time.rs
// ============================================================================
// Module: Timestamps
// Description: Wall-clock timestamp representation used in events, audit
// records, and budget/rate windows.
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Milliseconds since the Unix epoch.
///
/// # Invariants
/// - Always non-negative; the kernel never represents times before 1970.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Wraps a raw millisecond value.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the Unix epoch.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns the timestamp as whole seconds since the Unix epoch, truncating.
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1000
    }

    /// Returns the start of the fixed window of `window_s` seconds containing
    /// this timestamp, per the kernel's fixed-window rate-limit semantics.
    #[must_use]
    pub const fn window_start(self, window_s: u64) -> Self {
        if window_s == 0 {
            return self;
        }
        let secs = self.as_secs();
        Self::from_millis((secs - (secs % window_s)) * 1000)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Supplies the current time to kernel components.
///
/// Abstracted behind a trait so tests can inject deterministic clocks instead
/// of reading the system clock, following the same seam the teacher uses for
/// its trigger-source and evidence-provider collaborators.
pub trait Clock: Send + Sync {
    /// Returns the current timestamp.
    fn now(&self) -> Timestamp;
}

/// A [`Clock`] backed by [`std::time::SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp::from_millis(millis)
    }
}

/// A [`Clock`] that always returns a fixed timestamp, for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub Timestamp);

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]
mod tests {
    use super::*;

    #[test]
    fn window_start_aligns_to_boundary() {
        let t = Timestamp::from_millis(125_000);
        assert_eq!(t.window_start(60).as_secs(), 120);
    }

    #[test]
    fn window_start_exact_boundary_is_stable() {
        let t = Timestamp::from_millis(120_000);
        assert_eq!(t.window_start(60), t);
    }

    #[test]
    fn fixed_clock_returns_configured_value() {
        let clock = FixedClock(Timestamp::from_millis(42));
        assert_eq!(clock.now().as_millis(), 42);
    }
}
