// crates/wmag-core/src/hashchain.rs
// ============================================================================
// Module: HashChain
// Description: Tamper-evident, replayable per-run event log chaining using
// HMAC-SHA256 with key rotation.
// Invariants (from the kernel's event log contract):
//   E1. Every event's hash covers its own canonical payload plus the
//       previous event's hash, forming a chain rooted at a per-run genesis
//       value.
//   E2. Verifying a chain requires only the events themselves and the audit
//       key registry; no external state is consulted.
//   E3. Rotating the active key never invalidates previously signed events:
//       each event's hash records which key id signed it.
// Grounded on: decision-gate-core's hash-chain-adjacent key handling and the
// pack's broader use of `hmac` + `sha2` together for keyed digests.
// ============================================================================

use hmac::Hmac;
use hmac::Mac;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::CoreError;
use crate::hashing::HashDigest;
use crate::hashing::canonical_json_bytes;
use crate::identifiers::Kid;
use crate::time::Timestamp;

type HmacSha256 = Hmac<Sha256>;

/// A symmetric key used to sign hash chain links, identified by a [`Kid`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditKey {
    /// Key identifier, recorded alongside every hash it produces.
    pub kid: Kid,
    /// Raw key material. Never logged or displayed.
    pub secret: Vec<u8>,
    /// Whether this key is the one new signatures are produced with.
    pub active: bool,
    /// When this key was created.
    pub created_at: Timestamp,
    /// When this key was retired, if it has been.
    pub retired_at: Option<Timestamp>,
}

/// Holds every audit key a tenant has ever used, active and retired.
///
/// # Invariants
/// - Exactly one key has `active == true`.
/// - Keys are never removed, only retired, so old events can still be
///   verified after rotation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditKeyRegistry {
    keys: Vec<AuditKey>,
}

impl AuditKeyRegistry {
    /// Builds a registry from a set of keys, validating the single-active
    /// invariant.
    ///
    /// # Errors
    /// Returns [`CoreError::NoActiveKey`] or [`CoreError::MultipleActiveKeys`]
    /// if the active-key invariant is violated.
    pub fn new(keys: Vec<AuditKey>) -> Result<Self, CoreError> {
        let active_count = keys.iter().filter(|k| k.active).count();
        match active_count {
            0 => Err(CoreError::NoActiveKey),
            1 => Ok(Self { keys }),
            count => Err(CoreError::MultipleActiveKeys { count }),
        }
    }

    /// Returns the currently active key.
    ///
    /// # Errors
    /// Returns [`CoreError::NoActiveKey`] if, somehow, no key is active.
    pub fn active_key(&self) -> Result<&AuditKey, CoreError> {
        self.keys
            .iter()
            .find(|k| k.active)
            .ok_or(CoreError::NoActiveKey)
    }

    /// Looks up a key by id, active or retired.
    ///
    /// # Errors
    /// Returns [`CoreError::UnknownKey`] if no key with `kid` is registered.
    pub fn key(&self, kid: &Kid) -> Result<&AuditKey, CoreError> {
        self.keys
            .iter()
            .find(|k| &k.kid == kid)
            .ok_or_else(|| CoreError::UnknownKey { kid: kid.clone() })
    }

    /// Rotates the active key: retires the current active key at `now` and
    /// inserts `new_key` as the new active key.
    ///
    /// # Errors
    /// Returns [`CoreError::NoActiveKey`] if there is no current active key
    /// to retire.
    pub fn rotate(&mut self, mut new_key: AuditKey, now: Timestamp) -> Result<(), CoreError> {
        let current = self
            .keys
            .iter_mut()
            .find(|k| k.active)
            .ok_or(CoreError::NoActiveKey)?;
        current.active = false;
        current.retired_at = Some(now);
        new_key.active = true;
        new_key.retired_at = None;
        self.keys.push(new_key);
        Ok(())
    }
}

/// Computes the HMAC-SHA256 hash chain link for an event.
///
/// `prev_hash` is `None` only for the genesis link of a run. The signed
/// material is the canonical JSON encoding of `(prev_hash, payload)`, keyed
/// by the audit key identified by `kid`.
///
/// # Errors
/// Returns [`CoreError::UnknownKey`] if `kid` is not present in `registry`,
/// or [`CoreError::Canonicalize`] if `payload` cannot be canonicalized.
pub fn chain_hash<T: Serialize>(
    registry: &AuditKeyRegistry,
    kid: &Kid,
    prev_hash: Option<&HashDigest>,
    payload: &T,
) -> Result<HashDigest, CoreError> {
    let key = registry.key(kid)?;
    let mut mac =
        HmacSha256::new_from_slice(&key.secret).map_err(|_| CoreError::UnknownKey { kid: kid.clone() })?;

    #[derive(Serialize)]
    struct Link<'a, T> {
        prev_hash: Option<&'a HashDigest>,
        payload: &'a T,
    }

    let link = Link { prev_hash, payload };
    let bytes = canonical_json_bytes(&link)?;
    mac.update(&bytes);
    let tag = mac.finalize().into_bytes();
    let mut out = [0_u8; 32];
    out.copy_from_slice(&tag);
    Ok(HashDigest::from_bytes(out))
}

/// Verifies that `candidate` equals the hash chain link computed for the
/// same inputs, in constant time.
///
/// # Errors
/// Propagates [`chain_hash`] failures.
pub fn verify_chain_hash<T: Serialize>(
    registry: &AuditKeyRegistry,
    kid: &Kid,
    prev_hash: Option<&HashDigest>,
    payload: &T,
    candidate: &HashDigest,
) -> Result<bool, CoreError> {
    let expected = chain_hash(registry, kid, prev_hash, payload)?;
    Ok(expected.as_bytes().ct_eq(candidate.as_bytes()).into())
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

    fn registry_with_one_active_key() -> (AuditKeyRegistry, Kid) {
        let kid = Kid::new("k1");
        let key = AuditKey {
            kid: kid.clone(),
            secret: b"top-secret".to_vec(),
            active: true,
            created_at: Timestamp::from_millis(0),
            retired_at: None,
        };
        (AuditKeyRegistry::new(vec![key]).expect("valid registry"), kid)
    }

    #[test]
    fn registry_rejects_zero_active_keys() {
        let err = AuditKeyRegistry::new(vec![]).expect_err("should reject");
        assert!(matches!(err, CoreError::NoActiveKey));
    }

    #[test]
    fn registry_rejects_multiple_active_keys() {
        let a = AuditKey {
            kid: Kid::new("a"),
            secret: vec![1],
            active: true,
            created_at: Timestamp::from_millis(0),
            retired_at: None,
        };
        let b = AuditKey {
            kid: Kid::new("b"),
            secret: vec![2],
            active: true,
            created_at: Timestamp::from_millis(0),
            retired_at: None,
        };
        let err = AuditKeyRegistry::new(vec![a, b]).expect_err("should reject");
        assert!(matches!(err, CoreError::MultipleActiveKeys { count: 2 }));
    }

    #[test]
    fn chain_hash_is_deterministic() {
        let (registry, kid) = registry_with_one_active_key();
        let payload = json!({"kind": "status", "state": "working"});
        let first = chain_hash(&registry, &kid, None, &payload).expect("hash");
        let second = chain_hash(&registry, &kid, None, &payload).expect("hash");
        assert_eq!(first, second);
    }

    #[test]
    fn chain_hash_changes_with_prev_hash() {
        let (registry, kid) = registry_with_one_active_key();
        let payload = json!({"kind": "status"});
        let genesis = chain_hash(&registry, &kid, None, &payload).expect("hash");
        let linked = chain_hash(&registry, &kid, Some(&genesis), &payload).expect("hash");
        assert_ne!(genesis, linked);
    }

    #[test]
    fn verify_chain_hash_detects_tampering() {
        let (registry, kid) = registry_with_one_active_key();
        let payload = json!({"kind": "status"});
        let hash = chain_hash(&registry, &kid, None, &payload).expect("hash");
        let tampered_payload = json!({"kind": "tampered"});
        let ok = verify_chain_hash(&registry, &kid, None, &tampered_payload, &hash).expect("verify");
        assert!(!ok);
    }

    #[test]
    fn rotation_retires_old_key_and_preserves_verifiability() {
        let (mut registry, old_kid) = registry_with_one_active_key();
        let payload = json!({"kind": "status"});
        let old_hash = chain_hash(&registry, &old_kid, None, &payload).expect("hash");

        let new_key = AuditKey {
            kid: Kid::new("k2"),
            secret: b"new-secret".to_vec(),
            active: true,
            created_at: Timestamp::from_millis(100),
            retired_at: None,
        };
        registry
            .rotate(new_key, Timestamp::from_millis(100))
            .expect("rotate");

        assert_eq!(registry.active_key().expect("active").kid, Kid::new("k2"));
        let still_ok = verify_chain_hash(&registry, &old_kid, None, &payload, &old_hash).expect("verify");
        assert!(still_ok);
    }
}
