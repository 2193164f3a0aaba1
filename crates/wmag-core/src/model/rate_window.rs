// crates/wmag-core/src/model/rate_window.rs
// ============================================================================
// Module: Rate Window
// Description: Fixed-window rate limiting counters, scoped per tenant.
// Resolves Open Question 3 (fixed vs. sliding windows) as fixed windows:
// window_start = now - (now % rate_limit_window_s).
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::TenantId;
use crate::time::Timestamp;

/// What a rate limit counts requests against. Currently only tenant-scoped
/// limits are defined; the enum leaves room for future scopes (e.g. per
/// action) without changing the store schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScope {
    /// Counts mission submissions per tenant.
    TenantSubmissions,
    /// Counts step dispatches per tenant.
    TenantStepDispatches,
}

/// Identifies one fixed rate-limit window for one scope and tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateWindowKey {
    /// Tenant this window counts against.
    pub tenant_id: TenantId,
    /// What is being counted.
    pub scope: RateScope,
    /// Start of the fixed window, per [`Timestamp::window_start`].
    pub window_start: Timestamp,
}

/// The counter for one [`RateWindowKey`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateWindow {
    /// Which window this counts.
    pub key: RateWindowKey,
    /// Requests counted so far in this window.
    pub count: u64,
}

impl RateWindow {
    /// Returns whether accepting one more request would exceed `limit`.
    #[must_use]
    pub fn would_exceed(&self, limit: u64) -> bool {
        self.count.saturating_add(1) > limit
    }
}
