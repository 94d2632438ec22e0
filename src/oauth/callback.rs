//! Callback verification and token exchange.

use std::collections::HashMap;

use derive_more::Display;
use serde_json::Value;
use time::OffsetDateTime;

use crate::checks;
use crate::config::AuthOptions;
use crate::cookies::RequestCookies;
use crate::error::Error;
use crate::identity;
use crate::oauth::client::ProviderClient;
use crate::oauth::id_token;
use crate::provider::{OAuthProvider, ProviderKind};
use crate::types::{Account, Profile, TokenSet};

/// Progress of a single OAuth callback. Every transition is traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CallbackStage {
    AuthorizationRequested,
    CallbackReceived,
    StateValidated,
    TokenExchanged,
    ClaimsValidated,
    Complete,
    Error,
}

/// Query parameters the provider appends to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    #[must_use]
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        Self {
            code: query.get("code").cloned(),
            state: query.get("state").cloned(),
            error: query.get("error").cloned(),
            error_description: query.get("error_description").cloned(),
        }
    }
}

/// Verified identity returned by a successful callback.
#[derive(Debug, Clone)]
pub struct OAuthOutcome {
    pub profile: Profile,
    pub account: Account,
    pub tokens: TokenSet,
    /// Callback URL carried in `state`, if the provider declares the state check.
    pub callback_url: Option<String>,
}

struct StageTracker<'a> {
    provider: &'a str,
    stage: CallbackStage,
}

impl<'a> StageTracker<'a> {
    fn new(provider: &'a str) -> Self {
        Self {
            provider,
            stage: CallbackStage::AuthorizationRequested,
        }
    }

    fn advance(&mut self, next: CallbackStage) {
        tracing::debug!(
            provider = self.provider,
            from = %self.stage,
            to = %next,
            "OAuth callback stage"
        );
        self.stage = next;
    }

    fn fail(&mut self, error: &Error) {
        tracing::warn!(
            provider = self.provider,
            stage = %self.stage,
            error = %error,
            "OAuth callback failed"
        );
        self.stage = CallbackStage::Error;
    }
}

/// Runs the callback for `provider`: checks, code exchange, ID token and
/// profile. Check cookies are not cleared here; see [`checks::clear`].
pub(crate) async fn handle(
    client: &ProviderClient,
    provider: &OAuthProvider,
    options: &AuthOptions,
    params: &CallbackParams,
    cookies: &RequestCookies,
) -> Result<OAuthOutcome, Error> {
    let mut tracker = StageTracker::new(&provider.id);
    let result = run(&mut tracker, client, provider, options, params, cookies).await;
    match &result {
        Ok(_) => tracker.advance(CallbackStage::Complete),
        Err(e) => tracker.fail(e),
    }
    result
}

async fn run(
    tracker: &mut StageTracker<'_>,
    client: &ProviderClient,
    provider: &OAuthProvider,
    options: &AuthOptions,
    params: &CallbackParams,
    cookies: &RequestCookies,
) -> Result<OAuthOutcome, Error> {
    tracker.advance(CallbackStage::CallbackReceived);

    if let Some(code) = &params.error {
        return Err(Error::OAuthProvider {
            code: code.clone(),
            description: params.error_description.clone(),
        });
    }
    let code = params.code.as_deref().ok_or_else(|| Error::OAuthCallback {
        operation: "callback",
        status: None,
        detail: "missing authorization code".into(),
    })?;

    let callback_url = if provider.checks.state {
        checks::use_state(options, params.state.as_deref(), cookies)?
    } else {
        None
    };
    let code_verifier = if provider.checks.pkce {
        Some(checks::use_pkce(options, cookies)?)
    } else {
        None
    };
    let expected_nonce = if provider.checks.nonce {
        Some(checks::use_nonce(options, cookies)?)
    } else {
        None
    };
    tracker.advance(CallbackStage::StateValidated);

    let redirect_uri = options.provider_callback_url(&provider.id);
    let tokens = client
        .exchange_code(provider, code, &redirect_uri, code_verifier.as_deref())
        .await?;
    tracker.advance(CallbackStage::TokenExchanged);

    let raw = match provider.kind {
        ProviderKind::Oidc => {
            let id_token = tokens.id_token.as_deref().ok_or_else(|| Error::OAuthCallback {
                operation: "token exchange",
                status: None,
                detail: "token response has no id_token".into(),
            })?;
            let mut claims =
                id_token::verify(client, provider, id_token, expected_nonce.as_deref()).await?;
            if let Some(url) = &provider.userinfo_url {
                let userinfo = client.user_info(url, &tokens.access_token).await?;
                merge_userinfo(&mut claims, userinfo)?;
            }
            claims
        }
        _ => {
            let url = provider.userinfo_url.as_ref().ok_or_else(|| {
                Error::Configuration(format!("provider '{}' has no userinfo endpoint", provider.id))
            })?;
            client.user_info(url, &tokens.access_token).await?
        }
    };
    tracker.advance(CallbackStage::ClaimsValidated);

    let profile = identity::normalize_profile(provider, &raw, &tokens)?;
    let account = account_from_tokens(provider, &profile, &tokens);

    Ok(OAuthOutcome {
        profile,
        account,
        tokens,
        callback_url,
    })
}

/// Fills claims missing from the ID token with userinfo fields. The two `sub`s must agree.
fn merge_userinfo(claims: &mut Value, userinfo: Value) -> Result<(), Error> {
    let (Value::Object(claims), Value::Object(userinfo)) = (claims, userinfo) else {
        return Err(Error::invalid_id_token("claims or userinfo is not an object"));
    };
    if let Some(sub) = userinfo.get("sub")
        && claims.get("sub") != Some(sub)
    {
        return Err(Error::invalid_id_token("userinfo sub does not match ID token"));
    }
    for (key, value) in userinfo {
        claims.entry(key).or_insert(value);
    }
    Ok(())
}

fn account_from_tokens(provider: &OAuthProvider, profile: &Profile, tokens: &TokenSet) -> Account {
    Account {
        user_id: None,
        provider: provider.id.clone(),
        kind: provider.kind.as_str().to_owned(),
        provider_account_id: profile.id.clone(),
        access_token: Some(tokens.access_token.clone()),
        refresh_token: tokens.refresh_token.clone(),
        id_token: tokens.id_token.clone(),
        expires_at: tokens
            .expires_in
            .map(|secs| OffsetDateTime::now_utc().unix_timestamp() + secs),
        token_type: tokens.token_type.clone(),
        scope: tokens.scope.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::oauth::authorization_url;
    use crate::testing::test_options;

    fn provider(server: &MockServer) -> OAuthProvider {
        OAuthProvider::oauth(
            "mock",
            "Mock",
            "client-1",
            format!("{}/authorize", server.uri()).parse().unwrap(),
            format!("{}/token", server.uri()).parse().unwrap(),
            format!("{}/userinfo", server.uri()).parse().unwrap(),
        )
        .with_client_secret("shh")
    }

    fn client() -> ProviderClient {
        ProviderClient::new(Duration::from_secs(2)).unwrap()
    }

    /// Runs the authorization step and returns (state, cookie jar).
    fn authorize(provider: &OAuthProvider, options: &AuthOptions) -> (String, RequestCookies) {
        let request = authorization_url(provider, options, "http://localhost:3000/after", &[]);
        let state = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let jar = request
            .cookies
            .iter()
            .map(|c| (c.name().to_owned(), c.value().to_owned()))
            .collect();
        (state, jar)
    }

    #[tokio::test]
    async fn test_provider_error_makes_no_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let params = CallbackParams {
            error: Some("access_denied".into()),
            ..CallbackParams::default()
        };
        let err = handle(
            &client(),
            &provider(&server),
            &test_options(),
            &params,
            &RequestCookies::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::OAuthProvider { ref code, .. } if code == "access_denied"));
    }

    #[tokio::test]
    async fn test_missing_code() {
        let server = MockServer::start().await;
        let err = handle(
            &client(),
            &provider(&server),
            &test_options(),
            &CallbackParams::default(),
            &RequestCookies::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::OAuthCallback { .. }));
    }

    #[tokio::test]
    async fn test_tampered_state_rejected_before_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let options = test_options();
        let provider = provider(&server);
        let (state, jar) = authorize(&provider, &options);
        let params = CallbackParams {
            code: Some("abc".into()),
            state: Some(format!("{state}x")),
            ..CallbackParams::default()
        };
        let err = handle(&client(), &provider, &options, &params, &jar)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState));
    }

    #[tokio::test]
    async fn test_oauth_flow_produces_profile_and_account() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "token_type": "bearer",
                "refresh_token": "rt-1",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 99,
                "name": "Ada",
                "email": "ada@example.com"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let options = test_options();
        let provider = provider(&server);
        let (state, jar) = authorize(&provider, &options);
        let params = CallbackParams {
            code: Some("abc".into()),
            state: Some(state),
            ..CallbackParams::default()
        };
        let outcome = handle(&client(), &provider, &options, &params, &jar)
            .await
            .unwrap();

        assert_eq!(outcome.profile.id, "99");
        assert_eq!(outcome.account.provider, "mock");
        assert_eq!(outcome.account.kind, "oauth");
        assert_eq!(outcome.account.refresh_token.as_deref(), Some("rt-1"));
        assert!(outcome.account.expires_at.is_some());
        assert_eq!(
            outcome.callback_url.as_deref(),
            Some("http://localhost:3000/after")
        );
    }

    #[test]
    fn test_merge_userinfo_fills_gaps_and_checks_sub() {
        let mut claims = json!({ "sub": "1", "email": "a@b.c" });
        merge_userinfo(
            &mut claims,
            json!({ "sub": "1", "email": "x@y.z", "picture": "p" }),
        )
        .unwrap();
        assert_eq!(claims["email"], "a@b.c");
        assert_eq!(claims["picture"], "p");

        let mut claims = json!({ "sub": "1" });
        assert!(merge_userinfo(&mut claims, json!({ "sub": "2" })).is_err());
    }
}
