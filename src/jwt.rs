//! Session JWTs (`jwt` strategy).
//!
//! Tokens are HS256-signed. The signing key is derived per secret with
//! HKDF-SHA256, salted with the session cookie name.

use hkdf::Hkdf;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use time::{Duration, OffsetDateTime};

use crate::config::Secrets;
use crate::error::Error;
use crate::types::{Session, SessionUser, User};

const KEY_INFO_PREFIX: &str = "authbroker session signing key";
const RESERVED: [&str; 3] = ["iat", "exp", "jti"];

/// Claims carried by the session token.
///
/// The standard fields mirror the default sign-in claims; anything a `jwt`
/// callback adds lands in `extra` and round-trips unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JwtClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JwtClaims {
    /// Default sign-in claims: `{sub, name, email, picture}`.
    #[must_use]
    pub fn from_user(user: &User) -> Self {
        Self {
            sub: Some(user.id.0.clone()),
            name: user.name.clone(),
            email: user.email.clone(),
            picture: user.image.clone(),
            extra: Map::new(),
        }
    }

    /// Default public session view of these claims.
    #[must_use]
    pub fn to_session(&self, expires: OffsetDateTime) -> Session {
        Session {
            user: SessionUser {
                id: self.sub.clone(),
                name: self.name.clone(),
                email: self.email.clone(),
                image: self.picture.clone(),
            },
            expires,
        }
    }
}

#[derive(Serialize)]
struct Envelope {
    #[serde(flatten)]
    claims: JwtClaims,
    iat: i64,
    exp: i64,
    jti: String,
}

fn derive_key(secret: &str, salt: &str) -> Result<[u8; 32], Error> {
    let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), secret.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(format!("{KEY_INFO_PREFIX} ({salt})").as_bytes(), &mut okm)
        .map_err(|_| Error::InvalidSession("key derivation failed".into()))?;
    Ok(okm)
}

/// Encodes `claims` as an HS256 JWT that expires `max_age` from now.
///
/// # Errors
///
/// Returns [`Error::InvalidSession`] if signing fails.
pub fn encode(
    claims: &JwtClaims,
    secrets: &Secrets,
    salt: &str,
    max_age: Duration,
) -> Result<String, Error> {
    // Registered timing claims are always set here, never taken from callbacks.
    let mut claims = claims.clone();
    for name in RESERVED {
        claims.extra.remove(name);
    }
    let now = OffsetDateTime::now_utc();
    let envelope = Envelope {
        claims,
        iat: now.unix_timestamp(),
        exp: (now + max_age).unix_timestamp(),
        jti: uuid::Uuid::new_v4().to_string(),
    };
    let key = derive_key(secrets.current(), salt)?;
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &envelope,
        &EncodingKey::from_secret(&key),
    )
    .map_err(|e| Error::InvalidSession(e.to_string()))
}

/// Decodes and verifies a token produced by [`encode`] with any configured secret.
///
/// # Errors
///
/// Returns [`Error::InvalidSession`] if no secret verifies the signature, the
/// token is malformed, or `exp` has passed.
pub fn decode(token: &str, secrets: &Secrets, salt: &str) -> Result<JwtClaims, Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    let mut last_error = None;
    for secret in secrets.iter() {
        let key = derive_key(secret, salt)?;
        match jsonwebtoken::decode::<JwtClaims>(
            token,
            &DecodingKey::from_secret(&key),
            &validation,
        ) {
            Ok(data) => {
                let mut claims = data.claims;
                for name in RESERVED {
                    claims.extra.remove(name);
                }
                return Ok(claims);
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(Error::InvalidSession(
        last_error.map_or_else(|| "no secret configured".into(), |e| e.to_string()),
    ))
}
