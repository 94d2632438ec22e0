//! Transient protocol checks: `state`, `nonce` and the PKCE verifier.
//!
//! Each value lives in its own sealed cookie that carries its own expiry and is
//! cleared on the callback that consumes it.

use cookie::Cookie;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use time::Duration;

use crate::config::AuthOptions;
use crate::cookies::{self, RequestCookies};
use crate::error::Error;
use crate::pkce;
use crate::provider::OAuthProvider;

/// Lifetime of every check cookie.
pub const CHECK_MAX_AGE: Duration = Duration::minutes(15);

/// Decoded `state` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StatePayload {
    random: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    callback_url: Option<String>,
}

/// Values to send to the provider, plus the cookies that remember them.
#[derive(Debug, Default)]
pub struct CreatedChecks {
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub cookies: Vec<Cookie<'static>>,
}

fn check_cookie(options: &AuthOptions, name: &str, value: &str) -> Cookie<'static> {
    let sealed = cookies::seal_with_expiry(value, &options.secrets, CHECK_MAX_AGE);
    options.cookies.build(name, sealed, Some(CHECK_MAX_AGE))
}

/// Creates the checks `provider` declares. `state` embeds the callback URL.
#[must_use]
pub fn create(
    provider: &OAuthProvider,
    options: &AuthOptions,
    callback_url: &str,
) -> CreatedChecks {
    let names = &options.cookies.names;
    let mut created = CreatedChecks::default();

    if provider.checks.state {
        let payload = StatePayload {
            random: pkce::generate_nonce(),
            callback_url: Some(callback_url.to_owned()),
        };
        // Two strings always serialize.
        let json = serde_json::to_string(&payload).unwrap_or_default();
        let state = cookies::seal(&json, &options.secrets);
        created.cookies.push(check_cookie(options, &names.state, &state));
        created.state = Some(state);
    }

    if provider.checks.nonce {
        let nonce = pkce::generate_nonce();
        created.cookies.push(check_cookie(options, &names.nonce, &nonce));
        created.nonce = Some(nonce);
    }

    if provider.checks.pkce {
        let verifier = pkce::generate_code_verifier();
        created.code_challenge = Some(pkce::code_challenge(&verifier));
        created
            .cookies
            .push(check_cookie(options, &names.pkce_code_verifier, &verifier));
    }

    created
}

fn read_check(options: &AuthOptions, name: &str, cookies: &RequestCookies) -> Option<String> {
    let sealed = cookies.get(name)?;
    cookies::open_unexpired(sealed, &options.secrets).ok()
}

/// Verifies the returned `state` against its cookie.
///
/// Returns the callback URL embedded at sign-in, if any.
///
/// # Errors
///
/// Returns [`Error::InvalidState`] when the parameter or cookie is missing,
/// the cookie is expired, or the two differ.
pub fn use_state(
    options: &AuthOptions,
    returned: Option<&str>,
    cookies: &RequestCookies,
) -> Result<Option<String>, Error> {
    let returned = returned.ok_or(Error::InvalidState)?;
    let expected =
        read_check(options, &options.cookies.names.state, cookies).ok_or(Error::InvalidState)?;
    if !bool::from(returned.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(Error::InvalidState);
    }

    let json = cookies::open(returned, &options.secrets).map_err(|_| Error::InvalidState)?;
    let payload: StatePayload = serde_json::from_str(&json).map_err(|_| Error::InvalidState)?;
    Ok(payload.callback_url)
}

/// Reads the nonce stored at sign-in.
///
/// # Errors
///
/// Returns [`Error::InvalidNonce`] when the cookie is missing or expired.
pub fn use_nonce(options: &AuthOptions, cookies: &RequestCookies) -> Result<String, Error> {
    read_check(options, &options.cookies.names.nonce, cookies).ok_or(Error::InvalidNonce)
}

/// Reads the PKCE code verifier stored at sign-in.
///
/// # Errors
///
/// Returns [`Error::InvalidCheck`] when the cookie is missing or expired.
pub fn use_pkce(options: &AuthOptions, cookies: &RequestCookies) -> Result<String, Error> {
    read_check(options, &options.cookies.names.pkce_code_verifier, cookies)
        .ok_or(Error::InvalidCheck("pkce code_verifier"))
}

/// Removal cookies for every check cookie present in the request.
///
/// Applied to every callback response, successful or not, so a check value
/// can be consumed at most once.
#[must_use]
pub fn clear(options: &AuthOptions, cookies: &RequestCookies) -> Vec<Cookie<'static>> {
    let names = &options.cookies.names;
    [&names.state, &names.nonce, &names.pkce_code_verifier]
        .into_iter()
        .filter(|name| cookies.contains_key(name.as_str()))
        .map(|name| options.cookies.expired(name))
        .collect()
}
