//! HMAC authentication of inbound log events.
//!
//! Every event carries a lowercase-hex HMAC-SHA-256 tag computed by the
//! client over `payload || timestamp`, where the timestamp is the signed
//! 64-bit nanosecond value reinterpreted as unsigned and encoded big-endian
//! in exactly 8 bytes. Verification recomputes the tag and compares it to
//! the supplied string in constant time.
//!
//! Verification never surfaces an error: a malformed, truncated or
//! wrong-length signature is simply a mismatch. Timestamp freshness is not
//! checked here; stale timestamps are the anomaly detector's concern.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::{Choice, ConstantTimeEq};

type HmacSha256 = Hmac<Sha256>;

/// Verifies event signatures against the gateway's shared secret.
///
/// The keyed MAC state is built once at construction and cloned per
/// verification, so the secret bytes are touched only here.
#[derive(Clone)]
pub struct SignatureVerifier {
    mac: HmacSha256,
}

impl SignatureVerifier {
    /// Creates a verifier keyed with the shared secret.
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        let mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .expect("HMAC accepts keys of any length");
        Self { mac }
    }

    /// Returns `true` iff `signature_hex` is the correct tag for
    /// `(payload, timestamp_ns)`.
    ///
    /// Comparison is constant-time over the common prefix; a length mismatch
    /// yields `false` without short-circuiting the byte comparison.
    #[must_use]
    pub fn verify(&self, payload: &[u8], timestamp_ns: i64, signature_hex: &str) -> bool {
        let expected = self.sign(payload, timestamp_ns);
        constant_time_eq(expected.as_bytes(), signature_hex.as_bytes())
    }

    /// Computes the lowercase-hex tag for `(payload, timestamp_ns)`.
    ///
    /// This is the same computation clients perform; the gateway uses it for
    /// verification and tests use it to build valid events.
    #[must_use]
    pub fn sign(&self, payload: &[u8], timestamp_ns: i64) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload);
        // Two's-complement reinterpretation: negative timestamps wrap, matching
        // the client encoding.
        mac.update(&(timestamp_ns as u64).to_be_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

/// Constant-time equality that does not short-circuit on length mismatch.
///
/// XOR-accumulates over the common prefix, then folds the length comparison
/// into the final choice.
fn constant_time_eq(expected: &[u8], supplied: &[u8]) -> bool {
    let common = expected.len().min(supplied.len());
    let prefix_eq = expected[..common].ct_eq(&supplied[..common]);
    let len_eq = Choice::from(u8::from(expected.len() == supplied.len()));
    bool::from(prefix_eq & len_eq)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(secret: &str) -> SignatureVerifier {
        SignatureVerifier::new(&SecretString::from(secret.to_owned()))
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let v = verifier("k");
        let tag = v.sign(b"A", 1_000_000_000);
        assert_eq!(tag.len(), 64);
        assert!(v.verify(b"A", 1_000_000_000, &tag));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let v = verifier("k");
        let bogus = "deadbeef".repeat(8);
        assert_eq!(bogus.len(), 64);
        assert!(!v.verify(b"A", 1_000_000_000, &bogus));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let v = verifier("k");
        let tag = v.sign(b"A", 1_000_000_000);
        assert!(!v.verify(b"B", 1_000_000_000, &tag));
    }

    #[test]
    fn tampered_timestamp_is_rejected() {
        let v = verifier("k");
        let tag = v.sign(b"A", 1_000_000_000);
        assert!(!v.verify(b"A", 1_000_000_001, &tag));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let tag = verifier("k").sign(b"A", 1);
        assert!(!verifier("not-k").verify(b"A", 1, &tag));
    }

    #[test]
    fn empty_payload_is_well_defined() {
        let v = verifier("k");
        let tag = v.sign(b"", 42);
        assert!(v.verify(b"", 42, &tag));
    }

    #[test]
    fn negative_timestamp_wraps_deterministically() {
        let v = verifier("k");
        let tag = v.sign(b"x", -1);
        assert!(v.verify(b"x", -1, &tag));
        // -1 reinterprets to u64::MAX, not to the encoding of +1.
        assert!(!v.verify(b"x", 1, &tag));
    }

    #[test]
    fn length_mismatch_is_a_mismatch() {
        let v = verifier("k");
        let tag = v.sign(b"A", 7);
        assert!(!v.verify(b"A", 7, &tag[..32]));
        assert!(!v.verify(b"A", 7, ""));
        let long = format!("{tag}00");
        assert!(!v.verify(b"A", 7, &long));
    }

    #[test]
    fn malformed_hex_is_a_mismatch() {
        let v = verifier("k");
        let garbage = "zz".repeat(32);
        assert!(!v.verify(b"A", 7, &garbage));
    }

    #[test]
    fn uppercase_hex_is_a_mismatch() {
        // Tags are lowercase hex; the comparison is byte-exact.
        let v = verifier("k");
        let tag = v.sign(b"A", 7).to_uppercase();
        assert!(!v.verify(b"A", 7, &tag));
    }
}
