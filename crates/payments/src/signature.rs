//! HMAC-SHA256 helpers shared by the provider adapters.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::GatewayError;

type HmacSha256 = Hmac<Sha256>;

fn keyed(key: &str) -> Result<HmacSha256, GatewayError> {
    HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|_| GatewayError::NotConfigured("invalid HMAC key".into()))
}

/// Lowercase hex HMAC-SHA256 of `message`.
pub fn sign_hex(key: &str, message: &str) -> Result<String, GatewayError> {
    let mut mac = keyed(key)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature.
pub fn verify_hex(key: &str, message: &str, signature_hex: &str) -> Result<(), GatewayError> {
    let expected = hex::decode(signature_hex.trim()).map_err(|_| GatewayError::InvalidSignature)?;
    let mut mac = keyed(key)?;
    mac.update(message.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| GatewayError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_known_vector() {
        // RFC 4231 test case 2.
        let sig = sign_hex("Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_accepts_matching_and_rejects_tampered() {
        let sig = sign_hex("key2", "payload").unwrap();
        assert!(verify_hex("key2", "payload", &sig).is_ok());
        assert!(verify_hex("key2", "payload", &sig.to_uppercase()).is_ok());
        assert_eq!(
            verify_hex("key2", "payload!", &sig),
            Err(GatewayError::InvalidSignature)
        );
        assert_eq!(
            verify_hex("key2", "payload", "not-hex"),
            Err(GatewayError::InvalidSignature)
        );
    }
}
