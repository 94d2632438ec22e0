use cookie::Cookie;
use url::Url;

use crate::checks;
use crate::config::AuthOptions;
use crate::pkce::CODE_CHALLENGE_METHOD;
use crate::provider::OAuthProvider;

/// Parameters the broker owns; request-supplied values never override them.
const RESERVED_PARAMS: [&str; 8] = [
    "client_id",
    "redirect_uri",
    "response_type",
    "scope",
    "state",
    "nonce",
    "code_challenge",
    "code_challenge_method",
];

/// Provider redirect plus the check cookies to set alongside it.
#[derive(Debug)]
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: Url,
    pub cookies: Vec<Cookie<'static>>,
}

/// Builds the authorization redirect for `provider`.
///
/// `extra_params` are per-request authorization parameters (e.g. `login_hint`);
/// they override the provider's static parameters of the same name.
#[must_use]
pub fn authorization_url(
    provider: &OAuthProvider,
    options: &AuthOptions,
    callback_url: &str,
    extra_params: &[(String, String)],
) -> AuthorizationRequest {
    let created = checks::create(provider, options, callback_url);
    let redirect_uri = options.provider_callback_url(&provider.id);

    let extra: Vec<&(String, String)> = extra_params
        .iter()
        .filter(|(key, _)| !RESERVED_PARAMS.contains(&key.as_str()))
        .collect();

    let mut url = provider.authorization_url.clone();
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in &provider.authorization_params {
            if !extra.iter().any(|(k, _)| k == key) {
                query.append_pair(key, value);
            }
        }
        for (key, value) in &extra {
            query.append_pair(key, value);
        }

        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &provider.client_id)
            .append_pair("redirect_uri", &redirect_uri);
        if !provider.scope.is_empty() {
            query.append_pair("scope", &provider.scope);
        }
        if let Some(state) = &created.state {
            query.append_pair("state", state);
        }
        if let Some(nonce) = &created.nonce {
            query.append_pair("nonce", nonce);
        }
        if let Some(challenge) = &created.code_challenge {
            query
                .append_pair("code_challenge", challenge)
                .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);
        }
    }

    tracing::debug!(provider = %provider.id, "Built authorization URL");

    AuthorizationRequest {
        url,
        cookies: created.cookies,
    }
}
