//! HMAC-SHA256 webhook signatures

use hmac::{Hmac, Mac};
use qrgen_domain::{QrGenError, Result};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `body` under `secret`
///
/// # Errors
/// Returns `QrGenError::Internal` if the MAC cannot be keyed.
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| QrGenError::Internal(format!("invalid HMAC key: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Signature of the compact JSON serialization of `payload`.
///
/// Object keys serialize in sorted order, so equal payloads always produce
/// the same signature.
///
/// # Errors
/// See [`sign_body`].
pub fn sign_payload(secret: &str, payload: &Value) -> Result<String> {
    sign_body(secret, payload.to_string().as_bytes())
}

/// Constant-time check of a hex signature, for webhook receivers
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn signature_is_64_lowercase_hex() {
        let sig = sign_payload("secret", &json!({"event": "scan", "count": 3})).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn signature_is_stable_and_secret_dependent() {
        let payload = json!({"b": 2, "a": 1});
        let first = sign_payload("k1", &payload).unwrap();
        assert_eq!(first, sign_payload("k1", &payload).unwrap());
        assert_ne!(first, sign_payload("k2", &payload).unwrap());
    }

    #[test]
    fn key_order_does_not_change_signature() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(sign_payload("k", &a).unwrap(), sign_payload("k", &b).unwrap());
    }

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2
        let sig = sign_body("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(sig, "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843");
    }

    #[test]
    fn verify_round_trip_and_rejects_tampering() {
        let body = br#"{"event":"scan"}"#;
        let sig = sign_body("k", body).unwrap();

        assert!(verify_signature("k", body, &sig));
        assert!(!verify_signature("other", body, &sig));
        assert!(!verify_signature("k", br#"{"event":"scam"}"#, &sig));
        assert!(!verify_signature("k", body, "not-hex"));
    }
}
