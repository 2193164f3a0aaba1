// crates/wmag-core/src/identifiers.rs
// ============================================================================
// Module: Kernel Identifiers
// Description: Canonical opaque identifiers used across runs, plans, and
// registry documents.
// Purpose: Provide strongly typed, serializable identifiers with stable
// wire forms so that call sites never pass a `TenantId` where a `RunId` is
// expected.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers are opaque wrappers over `String` (or `u64` where the data
//! model calls for a monotonic counter). None of them normalize or validate
//! their contents beyond non-emptiness; callers are responsible for
//! generating well-formed values.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Declares an opaque, string-backed identifier newtype.
macro_rules! string_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(RunId, "Run identifier, unique globally.");
string_id!(TaskId, "Task identifier assigned at mission submission.");
string_id!(TenantId, "Tenant identifier scoping runs, budgets, and rate limits.");
string_id!(OrgId, "Organization identifier, one layer above tenant in the registry.");
string_id!(UserId, "User identifier for the submitting principal.");
string_id!(StepId, "Step identifier, unique within a single plan.");
string_id!(PlanId, "Plan identifier produced by the planner adapter.");
string_id!(ActionId, "Registry action identifier.");
string_id!(ToolId, "Registry tool identifier.");
string_id!(PolicyId, "Registry policy identifier.");
string_id!(RoleId, "Registry role identifier.");
string_id!(ApprovalId, "Approval identifier, unique per pending/decided approval.");
string_id!(JobId, "Worker job identifier.");
string_id!(Kid, "Audit key identifier used to select an HMAC secret.");
string_id!(IdemKey, "Deterministic idempotency key for a side-effect step invocation.");

/// Monotonic per-run event sequence number.
///
/// # Invariants
/// - Starts at 1 for the first event of a run.
/// - Strictly increases by 1 for every subsequent event in the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seq(u64);

impl Seq {
    /// The first sequence number assigned to a run's event log.
    pub const FIRST: Self = Self(1);

    /// Wraps a raw sequence value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number in the chain.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
