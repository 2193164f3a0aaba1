// crates/wmag-executor/src/idempotency.rs
// ============================================================================
// Module: Idempotency Key Derivation
// Description: spec.md §4.5 step 3's two strategies: "hash" derives
// idem_key = H(action_id || "|" || canonicalize(args, fields) || "|" ||
// tenant_id); "explicit_key" reads args.idempotency_key directly.
// ============================================================================

use serde::Serialize;
use wmag_core::hashing::hash_value;
use wmag_core::identifiers::ActionId;
use wmag_core::identifiers::IdemKey;
use wmag_core::identifiers::TenantId;

#[derive(Serialize)]
struct IdemInput<'a> {
    action_id: &'a ActionId,
    args: serde_json::Value,
    tenant_id: &'a TenantId,
}

/// Projects `args` down to the named `fields`, in declaration order, when
/// given. Missing fields are simply absent from the projection rather than
/// an error, so optional args do not change the derived key's shape.
fn canonicalize(args: &serde_json::Value, fields: Option<&[String]>) -> serde_json::Value {
    let Some(fields) = fields else {
        return args.clone();
    };
    let Some(object) = args.as_object() else {
        return args.clone();
    };
    let mut projected = serde_json::Map::with_capacity(fields.len());
    for field in fields {
        if let Some(value) = object.get(field) {
            projected.insert(field.clone(), value.clone());
        }
    }
    serde_json::Value::Object(projected)
}

/// Derives the deterministic idempotency key for the `hash` strategy.
///
/// # Errors
/// Returns an error message if `args` cannot be canonicalized (e.g. it
/// contains a non-finite float).
pub fn derive_hash_key(
    action_id: &ActionId,
    args: &serde_json::Value,
    fields: Option<&[String]>,
    tenant_id: &TenantId,
) -> Result<IdemKey, String> {
    let input = IdemInput { action_id, args: canonicalize(args, fields), tenant_id };
    let digest = hash_value(&input).map_err(|err| err.to_string())?;
    Ok(IdemKey::new(digest.to_hex()))
}

/// Derives the idempotency key for the `explicit_key` strategy: the caller
/// must supply `args.idempotency_key` as a string.
///
/// # Errors
/// Returns an error message if `args` is not an object or lacks a string
/// `idempotency_key` field.
pub fn derive_explicit_key(args: &serde_json::Value) -> Result<IdemKey, String> {
    args.get("idempotency_key")
        .and_then(serde_json::Value::as_str)
        .map(IdemKey::new)
        .ok_or_else(|| "explicit_key strategy requires args.idempotency_key".to_string())
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
    fn same_inputs_produce_same_key() {
        let a = derive_hash_key(&ActionId::new("send_email"), &serde_json::json!({"to": "x"}), None, &TenantId::new("t1"));
        let b = derive_hash_key(&ActionId::new("send_email"), &serde_json::json!({"to": "x"}), None, &TenantId::new("t1"));
        assert_eq!(a.expect("a"), b.expect("b"));
    }

    #[test]
    fn different_tenants_produce_different_keys() {
        let a = derive_hash_key(&ActionId::new("send_email"), &serde_json::json!({"to": "x"}), None, &TenantId::new("t1"));
        let b = derive_hash_key(&ActionId::new("send_email"), &serde_json::json!({"to": "x"}), None, &TenantId::new("t2"));
        assert_ne!(a.expect("a"), b.expect("b"));
    }

    #[test]
    fn key_ignores_json_field_insertion_order() {
        let a = derive_hash_key(&ActionId::new("a"), &serde_json::json!({"x": 1, "y": 2}), None, &TenantId::new("t1"));
        let b = derive_hash_key(&ActionId::new("a"), &serde_json::json!({"y": 2, "x": 1}), None, &TenantId::new("t1"));
        assert_eq!(a.expect("a"), b.expect("b"));
    }

    #[test]
    fn fields_projection_ignores_unlisted_args() {
        let full = serde_json::json!({"to": "x", "trace_id": "ignored-in-projection"});
        let projected_only = serde_json::json!({"to": "x", "trace_id": "different-but-ignored"});
        let fields = vec!["to".to_string()];
        let a = derive_hash_key(&ActionId::new("a"), &full, Some(&fields), &TenantId::new("t1"));
        let b = derive_hash_key(&ActionId::new("a"), &projected_only, Some(&fields), &TenantId::new("t1"));
        assert_eq!(a.expect("a"), b.expect("b"));
    }

    #[test]
    fn explicit_key_reads_idempotency_key_field() {
        let key = derive_explicit_key(&serde_json::json!({"idempotency_key": "req-123"})).expect("key");
        assert_eq!(key.as_str(), "req-123");
    }

    #[test]
    fn explicit_key_errors_when_missing() {
        let err = derive_explicit_key(&serde_json::json!({})).expect_err("should fail");
        assert!(err.contains("idempotency_key"));
    }
}
