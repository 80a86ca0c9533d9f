use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify the `X-Chatwoot-Signature` header: hex-encoded HMAC-SHA256 of the
/// raw request body. Comparison is constant-time via the hmac crate.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Some(signature) = decode_hex(signature_hex.trim()) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Hex signature of a body, used by tests and local tooling to mint valid
/// headers.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    encode_hex(&mac.finalize().into_bytes())
}

fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&input[index..index + 2], 16).ok())
        .collect()
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::{sign, verify_signature};

    #[test]
    fn round_trip_signature_verifies() {
        let body = br#"{"event":"message_created"}"#;
        let signature = sign("webhook-secret", body);
        assert!(verify_signature("webhook-secret", body, &signature));
    }

    #[test]
    fn tampered_body_or_wrong_secret_fails() {
        let body = br#"{"event":"message_created"}"#;
        let signature = sign("webhook-secret", body);

        assert!(!verify_signature("webhook-secret", br#"{"event":"forged"}"#, &signature));
        assert!(!verify_signature("other-secret", body, &signature));
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        let body = b"payload";
        assert!(!verify_signature("secret", body, "not-hex"));
        assert!(!verify_signature("secret", body, "abc"));
        assert!(!verify_signature("secret", body, ""));
    }
}
