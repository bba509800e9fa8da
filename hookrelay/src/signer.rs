//! Versioned HMAC-SHA256 signing for delivery payloads.
//!
//! Signatures cover the canonical JSON serialization of the payload and are
//! hex-encoded with a `v1=` version prefix. Verification uses constant-time
//! comparison and enforces a replay window on the supplied timestamp.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Version tag prefixed to every signature.
pub const SIGNATURE_PREFIX: &str = "v1=";

/// Algorithm identifier advertised in delivery headers.
pub const SIGNATURE_ALGORITHM: &str = "hmac-sha256";

type HmacSha256 = Hmac<Sha256>;

/// Canonical serialization a signature is computed over.
///
/// `serde_json` preserves map insertion order in this crate, so the same
/// payload always serializes to the same byte sequence.
#[must_use]
pub fn canonical_json(payload: &serde_json::Value) -> String {
    payload.to_string()
}

/// Compute the `v1=`-prefixed hex HMAC-SHA256 signature for a payload.
#[must_use]
pub fn sign(secret: &str, payload: &serde_json::Value) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(canonical_json(payload).as_bytes());

    format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Verify a signature against a payload and a sender timestamp.
///
/// Returns `false` on any mismatch, malformed signature, or when the
/// timestamp falls outside the tolerance window. Never returns an error:
/// a failed verification carries no detail an attacker could use.
#[must_use]
pub fn verify(
    secret: &str,
    payload: &serde_json::Value,
    signature: &str,
    timestamp: i64,
    tolerance_seconds: i64,
) -> bool {
    if (Utc::now().timestamp() - timestamp).abs() > tolerance_seconds {
        return false;
    }

    if !signature.starts_with(SIGNATURE_PREFIX) {
        return false;
    }

    let expected = sign(secret, payload);
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
