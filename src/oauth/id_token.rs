use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::Value;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::error::Error;
use crate::oauth::client::ProviderClient;
use crate::provider::OAuthProvider;

/// Clock skew tolerated on `exp` and `iat`.
const LEEWAY_SECS: u64 = 60;

fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Picks the JWKS entry for `kid`, or the only key when the token names none.
fn select_jwk<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Result<&'a Jwk, Error> {
    match kid {
        Some(kid) => jwks
            .find(kid)
            .ok_or_else(|| Error::invalid_id_token(format!("no JWKS key with kid '{kid}'"))),
        None => match jwks.keys.as_slice() {
            [only] => Ok(only),
            _ => Err(Error::invalid_id_token("token has no kid and JWKS is ambiguous")),
        },
    }
}

/// Verifies an ID token and returns its claims.
///
/// Asymmetric algorithms are checked against the provider's JWKS (fetched once
/// per call); HMAC algorithms against the client secret.
pub(crate) async fn verify(
    client: &ProviderClient,
    provider: &OAuthProvider,
    id_token: &str,
    expected_nonce: Option<&str>,
) -> Result<Value, Error> {
    let header = decode_header(id_token)
        .map_err(|e| Error::invalid_id_token(format!("malformed header: {e}")))?;

    let key = if is_hmac(header.alg) {
        let secret = provider
            .client_secret
            .as_deref()
            .ok_or_else(|| Error::invalid_id_token("HMAC-signed token but no client secret"))?;
        DecodingKey::from_secret(secret.as_bytes())
    } else {
        let jwks_uri = provider
            .jwks_uri
            .as_ref()
            .ok_or_else(|| Error::invalid_id_token("provider has no jwks_uri"))?;
        let jwks = client.fetch_jwks(jwks_uri).await?;
        let jwk = select_jwk(&jwks, header.kid.as_deref())?;
        DecodingKey::from_jwk(jwk)
            .map_err(|e| Error::invalid_id_token(format!("unusable JWK: {e}")))?
    };

    validate(provider, id_token, header.alg, &key, expected_nonce)
}

/// Signature and claim checks, given the resolved key.
pub(crate) fn validate(
    provider: &OAuthProvider,
    id_token: &str,
    alg: Algorithm,
    key: &DecodingKey,
    expected_nonce: Option<&str>,
) -> Result<Value, Error> {
    let issuer = provider
        .issuer
        .as_deref()
        .ok_or_else(|| Error::invalid_id_token("provider has no issuer"))?;

    let mut validation = Validation::new(alg);
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[provider.client_id.as_str()]);
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
    validation.leeway = LEEWAY_SECS;

    let claims = decode::<Value>(id_token, key, &validation)
        .map_err(|e| Error::invalid_id_token(e.to_string()))?
        .claims;

    let now = OffsetDateTime::now_utc().unix_timestamp();
    match claims.get("iat").and_then(Value::as_i64) {
        Some(iat) if iat > now + LEEWAY_SECS as i64 => {
            return Err(Error::invalid_id_token("iat is in the future"));
        }
        Some(_) => {}
        None => return Err(Error::invalid_id_token("missing iat")),
    }

    if let Some(expected) = expected_nonce {
        let nonce = claims.get("nonce").and_then(Value::as_str).ok_or(Error::InvalidNonce)?;
        if !bool::from(nonce.as_bytes().ct_eq(expected.as_bytes())) {
            return Err(Error::InvalidNonce);
        }
    }

    Ok(claims)
}
