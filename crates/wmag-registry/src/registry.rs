// crates/wmag-registry/src/registry.rs
// ============================================================================
// Module: Effective Registry
// Description: Holds the merged base/org/tenant/user registry document and
// exposes it behind an atomically swappable snapshot pointer.
// Grounded on: decision-gate-core::interfaces::DataShapeRegistry's
// snapshot-and-swap pattern. The teacher's workspace does not carry
// `arc-swap`, so the swap is implemented with `RwLock<Arc<_>>`, which gives
// the same "readers never block a writer's preparation" semantics without
// adding a dependency the rest of the stack does not use.
// ============================================================================

use std::sync::Arc;
use std::sync::RwLock;

use serde_json::Value;
use tracing::info;
use wmag_core::model::registry_doc::RegistryDocument;
use wmag_policy::validate_policies;

use crate::error::RegistryError;
use crate::merge::merge_layers;

/// The merged registry document in effect for one tenant, plus the raw
/// layers it was built from (kept for diagnostics and `wmag-cli verify`).
#[derive(Debug, Clone)]
pub struct EffectiveRegistry {
    /// The typed, merged document.
    pub document: RegistryDocument,
}

impl EffectiveRegistry {
    /// Merges `base -> org -> tenant -> user` layers, validates the result,
    /// and wraps it as an [`EffectiveRegistry`].
    ///
    /// # Errors
    /// Returns [`RegistryError::InvalidShape`] if the merged document does
    /// not match [`RegistryDocument`]'s shape, or [`RegistryError::Policy`]
    /// if any merged policy's condition tree exceeds the nesting limit.
    pub fn build(
        base: Option<&Value>,
        org: Option<&Value>,
        tenant: Option<&Value>,
        user: Option<&Value>,
    ) -> Result<Self, RegistryError> {
        let merged = merge_layers(&[base, org, tenant, user]);
        let document: RegistryDocument =
            serde_json::from_value(merged).map_err(|source| RegistryError::InvalidShape { source })?;
        validate_policies(&document.policies)?;
        Ok(Self { document })
    }
}

/// An atomically swappable handle to the current [`EffectiveRegistry`] for
/// one tenant.
///
/// Readers call [`RegistrySnapshot::current`] to get a cheap `Arc` clone of
/// whatever was current at call time; a concurrent [`RegistrySnapshot::swap`]
/// never blocks them and they never observe a partially-built document.
#[derive(Debug)]
pub struct RegistrySnapshot {
    inner: RwLock<Arc<EffectiveRegistry>>,
}

impl RegistrySnapshot {
    /// Creates a snapshot holder seeded with `initial`.
    #[must_use]
    pub fn new(initial: EffectiveRegistry) -> Self {
        Self { inner: RwLock::new(Arc::new(initial)) }
    }

    /// Returns the currently active registry document.
    #[must_use]
    pub fn current(&self) -> Arc<EffectiveRegistry> {
        self.inner
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_else(|poisoned| Arc::clone(&poisoned.into_inner()))
    }

    /// Atomically replaces the active registry document with `next`.
    pub fn swap(&self, next: EffectiveRegistry) {
        let new_arc = Arc::new(next);
        match self.inner.write() {
            Ok(mut guard) => *guard = new_arc,
            Err(poisoned) => *poisoned.into_inner() = new_arc,
        }
        info!("registry snapshot swapped");
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
    use serde_json::json;

    use super::*;

    #[test]
    fn build_merges_layers_and_validates_policies() {
        let base = json!({
            "limits": {
                "max_budget_per_run": 100,
                "max_concurrent_steps": 2,
                "max_concurrent_runs_per_tenant": 5,
                "rate_limit_window_s": 60,
                "rate_limit_max_per_window": 100
            },
            "policies": [
                {
                    "policy_id": "allow-all",
                    "phase": "gate_approval",
                    "priority": 0,
                    "when": {"op": "action_glob", "pattern": "*"},
                    "effect": {"allow": true}
                }
            ]
        });
        let registry = EffectiveRegistry::build(Some(&base), None, None, None).expect("build");
        assert_eq!(registry.document.policies.len(), 1);
        assert_eq!(registry.document.limits.max_budget_per_run, 100);
    }

    #[test]
    fn snapshot_swap_is_visible_to_subsequent_readers() {
        let base = json!({
            "limits": {
                "max_budget_per_run": 100,
                "max_concurrent_steps": 2,
                "max_concurrent_runs_per_tenant": 5,
                "rate_limit_window_s": 60,
                "rate_limit_max_per_window": 100
            }
        });
        let first = EffectiveRegistry::build(Some(&base), None, None, None).expect("build");
        let snapshot = RegistrySnapshot::new(first);
        assert_eq!(snapshot.current().document.limits.max_budget_per_run, 100);

        let overlay = json!({"limits": {"max_budget_per_run": 999}});
        let second = EffectiveRegistry::build(Some(&base), Some(&overlay), None, None).expect("build");
        snapshot.swap(second);
        assert_eq!(snapshot.current().document.limits.max_budget_per_run, 999);
    }
}
