// crates/wmag-core/src/hashing.rs
// ============================================================================
// Module: Canonical Hashing
// Description: Canonical JSON encoding and SHA-256 digest helpers shared by
// the hash chain, idempotency key derivation, and registry merge hashing.
// Grounded on: decision-gate-core::core::hashing-style canonicalization over
// serde_json, relying on serde_json::Map's default BTreeMap backing for
// deterministic key ordering.
// ============================================================================

use std::fmt;

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::error::CoreError;

/// A SHA-256 digest, rendered as lowercase hex for display and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct HashDigest([u8; 32]);

impl HashDigest {
    /// Wraps a raw 32-byte digest.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Renders the digest as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Serializes `value` to canonical JSON bytes: sorted object keys, no
/// insignificant whitespace, UTF-8, shortest round-trippable numeric form.
///
/// # Errors
/// Returns [`CoreError::Canonicalize`] if `value` cannot be serialized, e.g.
/// it contains a non-finite float.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    // serde_json's default `Map` is BTreeMap-backed (the `preserve_order`
    // feature is intentionally not enabled), so `to_vec` already emits keys
    // in sorted order with no extra whitespace.
    serde_json::to_vec(value).map_err(|source| CoreError::Canonicalize { source })
}

/// Computes the SHA-256 digest of canonical JSON bytes for `value`.
///
/// # Errors
/// Propagates [`canonical_json_bytes`] failures.
pub fn hash_value<T: Serialize>(value: &T) -> Result<HashDigest, CoreError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(&bytes))
}

/// Computes the SHA-256 digest of a raw byte slice.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> HashDigest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0_u8; 32];
    out.copy_from_slice(&digest);
    HashDigest::from_bytes(out)
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
    fn canonical_bytes_sort_object_keys() {
        let value = json!({"b": 1, "a": 2});
        let bytes = canonical_json_bytes(&value).expect("serialize");
        assert_eq!(bytes, br#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonical_bytes_are_deterministic_across_insertion_order() {
        let a = json!({"z": 1, "m": {"y": 2, "x": 3}});
        let b = json!({"m": {"x": 3, "y": 2}, "z": 1});
        assert_eq!(
            canonical_json_bytes(&a).expect("serialize a"),
            canonical_json_bytes(&b).expect("serialize b")
        );
    }

    #[test]
    fn hash_value_matches_hash_bytes_of_canonical_form() {
        let value = json!({"a": 1});
        let expected = hash_bytes(br#"{"a":1}"#);
        assert_eq!(hash_value(&value).expect("hash"), expected);
    }

    #[test]
    fn digest_hex_round_trips_through_display() {
        let digest = hash_bytes(b"wmag");
        assert_eq!(digest.to_string(), digest.to_hex());
        assert_eq!(digest.to_hex().len(), 64);
    }
}
