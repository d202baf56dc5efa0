//! HMAC-SHA256 webhook secret verification — a constant-time comparison to
//! avoid timing side-channels (spec §4.4 webhook triggers).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies `signature` (hex-encoded) is the HMAC-SHA256 of `payload` keyed by
/// `secret`. Returns `false` on any malformed input rather than erroring —
/// callers treat an unverifiable signature the same as a wrong one.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    let Ok(expected_bytes) = hex_decode(signature) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected_bytes).is_ok()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        mac.finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    #[test]
    fn test_valid_signature_accepted() {
        let sig = sign("shh", b"hello");
        assert!(verify_signature("shh", b"hello", &sig));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let sig = sign("shh", b"hello");
        assert!(!verify_signature("other", b"hello", &sig));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let sig = sign("shh", b"hello");
        assert!(!verify_signature("shh", b"goodbye", &sig));
    }

    #[test]
    fn test_malformed_signature_rejected() {
        assert!(!verify_signature("shh", b"hello", "not-hex"));
    }
}
