// crates/wmag-executor/src/retry.rs
// ============================================================================
// Module: Retry Policy
// Description: Resolves a retry-class name to a RetryConfig and computes the
// exponential-with-jitter backoff schedule of SPEC_FULL.md §4.5.
// Invariants:
//   - `auth`, `invalid_input`, `policy_denied`, `idempotency`, `budget_exceeded`
//     and `not_found` never retry regardless of attempt count.
//   - `rate_limited` honors a server-provided retry-after duration when one
//     is given, falling back to the transient_network schedule otherwise.
// ============================================================================

use std::time::Duration;

use rand::Rng;
use wmag_core::model::registry_doc::RetryConfig;

/// The built-in retry taxonomy of SPEC_FULL.md §4.5, used whenever the
/// effective registry does not define a class by this name.
#[must_use]
pub fn default_retry_config(class: &str) -> RetryConfig {
    let (retryable, max_attempts, base_backoff_ms, backoff_factor, backoff_cap_ms) = match class {
        "transient_network" => (true, 5, 100, 2.0, 5_000),
        "rate_limited" => (true, 5, 100, 2.0, 5_000),
        "timeout" => (true, 3, 250, 2.0, 5_000),
        "conflict" => (true, 3, 50, 2.0, 1_000),
        "internal" => (true, 2, 200, 2.0, 2_000),
        // not_found, auth, invalid_input, policy_denied, idempotency,
        // budget_exceeded, and any unrecognized class: fail fast.
        _ => (false, 1, 0, 1.0, 0),
    };
    RetryConfig {
        class: class.to_string(),
        retryable,
        max_attempts,
        base_backoff_ms,
        backoff_factor,
        backoff_cap_ms,
    }
}

/// Looks up `class` in the registry's retry taxonomy, falling back to
/// [`default_retry_config`] when the registry does not define it.
#[must_use]
pub fn resolve_retry_config(registry_classes: &[RetryConfig], class: &str) -> RetryConfig {
    registry_classes
        .iter()
        .find(|r| r.class == class)
        .cloned()
        .unwrap_or_else(|| default_retry_config(class))
}

/// Computes the backoff duration before `attempt` (1-based: the delay
/// before the *next* attempt after `attempt` has failed), applying +/-20%
/// jitter and the class's cap. `retry_after` overrides the computed delay
/// when the failure carried a server-provided value (the `rate_limited`
/// class).
#[must_use]
pub fn backoff_duration(cfg: &RetryConfig, attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(retry_after) = retry_after {
        return retry_after;
    }
    let exp = cfg.backoff_factor.powi(attempt.saturating_sub(1) as i32);
    #[allow(clippy::cast_precision_loss)]
    let raw_ms = cfg.base_backoff_ms as f64 * exp;
    let capped_ms = raw_ms.min(cfg.backoff_cap_ms as f64);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    let jittered_ms = (capped_ms * jitter).max(0.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Duration::from_millis(jittered_ms as u64)
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
    fn non_retryable_classes_allow_exactly_one_attempt() {
        for class in ["auth", "invalid_input", "policy_denied", "idempotency", "budget_exceeded", "not_found"] {
            let cfg = default_retry_config(class);
            assert!(!cfg.retryable, "{class} should not be retryable");
            assert_eq!(cfg.max_attempts, 1);
        }
    }

    #[test]
    fn transient_network_allows_five_attempts() {
        let cfg = default_retry_config("transient_network");
        assert!(cfg.retryable);
        assert_eq!(cfg.max_attempts, 5);
    }

    #[test]
    fn backoff_respects_cap() {
        let cfg = default_retry_config("transient_network");
        let delay = backoff_duration(&cfg, 10, None);
        assert!(delay <= Duration::from_millis(cfg.backoff_cap_ms + cfg.backoff_cap_ms / 5));
    }

    #[test]
    fn retry_after_overrides_computed_backoff() {
        let cfg = default_retry_config("rate_limited");
        let delay = backoff_duration(&cfg, 1, Some(Duration::from_secs(30)));
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn resolve_prefers_registry_override_over_default() {
        let overridden = RetryConfig {
            class: "transient_network".to_string(),
            retryable: true,
            max_attempts: 9,
            base_backoff_ms: 10,
            backoff_factor: 1.5,
            backoff_cap_ms: 500,
        };
        let resolved = resolve_retry_config(std::slice::from_ref(&overridden), "transient_network");
        assert_eq!(resolved.max_attempts, 9);
    }

    #[test]
    fn resolve_falls_back_to_default_when_absent() {
        let resolved = resolve_retry_config(&[], "timeout");
        assert_eq!(resolved.max_attempts, 3);
    }
}
