//! Double-submit CSRF token.
//!
//! The cookie holds `token|hash` with `hash = hex(SHA-256(token ++ secret))`.
//! A POST is verified when the cookie's hash checks out and the form field
//! echoes the same token.

use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::actions::AuthAction;
use crate::config::Secrets;
use crate::error::Error;

/// Request data the guard looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrfInput<'a> {
    /// Raw value of the CSRF cookie, if present.
    pub cookie_value: Option<&'a str>,
    pub is_post: bool,
    /// `csrfToken` form field of a POST body.
    pub body_value: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken {
    pub token: String,
    /// `true` only for a POST whose body token matches a valid cookie.
    pub verified: bool,
    /// New `token|hash` cookie value when the token was (re)minted.
    pub cookie: Option<String>,
}

fn hash(token: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn ct_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Returns the token from a cookie whose hash verifies under any secret.
fn trusted_token<'a>(cookie_value: &'a str, secrets: &Secrets) -> Option<&'a str> {
    let (token, cookie_hash) = cookie_value.split_once('|')?;
    secrets
        .iter()
        .any(|secret| ct_eq(&hash(token, secret), cookie_hash))
        .then_some(token)
}

/// Verifies the CSRF cookie or mints a new token.
///
/// A valid cookie is never rotated. A missing or tampered cookie yields a
/// fresh token, `verified = false`, and the cookie value to set.
#[must_use]
pub fn create_csrf_token(input: CsrfInput<'_>, secrets: &Secrets) -> CsrfToken {
    if let Some(token) = input.cookie_value.and_then(|v| trusted_token(v, secrets)) {
        let verified = input.is_post && input.body_value.is_some_and(|body| ct_eq(body, token));
        return CsrfToken {
            token: token.to_owned(),
            verified,
            cookie: None,
        };
    }

    let bytes: [u8; 32] = rand::rng().random();
    let token = hex::encode(bytes);
    let cookie = format!("{token}|{}", hash(&token, secrets.current()));
    CsrfToken {
        token,
        verified: false,
        cookie: Some(cookie),
    }
}

/// Fails with [`Error::MissingCsrf`] unless the token was verified.
///
/// # Errors
///
/// Returns [`Error::MissingCsrf`] when `verified` is false.
pub fn validate_csrf(action: AuthAction, verified: bool) -> Result<(), Error> {
    if verified {
        return Ok(());
    }
    tracing::warn!(%action, "CSRF token missing or invalid");
    Err(Error::MissingCsrf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_secrets;

    fn mint() -> (String, String) {
        let minted = create_csrf_token(CsrfInput::default(), &test_secrets());
        (minted.token, minted.cookie.unwrap())
    }

    #[test]
    fn test_mint_when_cookie_absent() {
        let minted = create_csrf_token(CsrfInput::default(), &test_secrets());
        assert!(!minted.verified);
        assert_eq!(minted.token.len(), 64);
        let cookie = minted.cookie.unwrap();
        assert!(cookie.starts_with(&format!("{}|", minted.token)));
    }

    #[test]
    fn test_valid_post_is_verified_without_rotation() {
        let (token, cookie) = mint();
        let result = create_csrf_token(
            CsrfInput {
                cookie_value: Some(&cookie),
                is_post: true,
                body_value: Some(&token),
            },
            &test_secrets(),
        );
        assert!(result.verified);
        assert_eq!(result.token, token);
        assert!(result.cookie.is_none());
    }

    #[test]
    fn test_get_with_valid_cookie_is_not_verified() {
        let (token, cookie) = mint();
        let result = create_csrf_token(
            CsrfInput {
                cookie_value: Some(&cookie),
                is_post: false,
                body_value: Some(&token),
            },
            &test_secrets(),
        );
        assert!(!result.verified);
        assert_eq!(result.token, token);
    }

    #[test]
    fn test_body_mismatch_is_not_verified() {
        let (_, cookie) = mint();
        let result = create_csrf_token(
            CsrfInput {
                cookie_value: Some(&cookie),
                is_post: true,
                body_value: Some("something-else"),
            },
            &test_secrets(),
        );
        assert!(!result.verified);
        assert!(result.cookie.is_none());
    }

    #[test]
    fn test_single_bit_mutation_rotates() {
        let (token, cookie) = mint();
        let mut bytes = cookie.into_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let mutated = String::from_utf8(bytes).unwrap();

        let result = create_csrf_token(
            CsrfInput {
                cookie_value: Some(&mutated),
                is_post: true,
                body_value: Some(&token),
            },
            &test_secrets(),
        );
        assert!(!result.verified);
        assert_ne!(result.token, token);
        assert!(result.cookie.is_some());
    }

    #[test]
    fn test_single_bit_mutation_of_token_half_rotates() {
        let (token, cookie) = mint();
        let (token_half, hash) = cookie.split_once('|').unwrap();
        let mut bytes = token_half.as_bytes().to_vec();
        bytes[0] ^= 0x01;
        let mutated_token = String::from_utf8(bytes).unwrap();
        let mutated = format!("{mutated_token}|{hash}");

        for body in [token.as_str(), mutated_token.as_str()] {
            let result = create_csrf_token(
                CsrfInput {
                    cookie_value: Some(&mutated),
                    is_post: true,
                    body_value: Some(body),
                },
                &test_secrets(),
            );
            assert!(!result.verified);
            assert_ne!(result.token, token);
            assert_ne!(result.token, mutated_token);
            assert!(result.cookie.is_some());
        }
    }

    #[test]
    fn test_cookie_from_other_secret_rotates() {
        let foreign = create_csrf_token(CsrfInput::default(), &Secrets::new(["other"]).unwrap());
        let result = create_csrf_token(
            CsrfInput {
                cookie_value: foreign.cookie.as_deref(),
                is_post: true,
                body_value: Some(&foreign.token),
            },
            &test_secrets(),
        );
        assert!(!result.verified);
    }

    #[test]
    fn test_validate() {
        assert!(validate_csrf(AuthAction::SignIn, true).is_ok());
        assert!(matches!(
            validate_csrf(AuthAction::SignOut, false),
            Err(Error::MissingCsrf)
        ));
    }
}
