//! Random protocol values: PKCE verifier/challenge and nonces.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Challenge method sent alongside every code challenge.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Fresh PKCE `code_verifier`: 48 random bytes as 64 base64url characters,
/// inside the 43..=128 range RFC 7636 allows.
#[must_use]
pub fn generate_code_verifier() -> String {
    let bytes: [u8; 48] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `challenge = BASE64URL(SHA256(verifier))`
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// 32 random bytes, base64url. Used for OIDC nonces and the random half of `state`.
#[must_use]
pub fn generate_nonce() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_verifier_shape() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 64);
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier should be URL-safe: {verifier}"
        );
        assert_ne!(verifier, generate_code_verifier());
    }

    #[test]
    fn test_code_challenge_rfc7636_vector() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_nonce_uniqueness() {
        let n1 = generate_nonce();
        assert_eq!(n1.len(), 43);
        assert_ne!(n1, generate_nonce(), "nonces should be unique");
    }
}
