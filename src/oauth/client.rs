use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use serde_json::Value;
use url::Url;

use crate::error::Error;
use crate::provider::{ClientAuthMethod, OAuthProvider};
use crate::types::TokenSet;

/// Outbound HTTP to provider endpoints. Every call is a single attempt bounded
/// by the configured timeout.
#[derive(Debug, Clone)]
pub(crate) struct ProviderClient {
    http: reqwest::Client,
}

impl ProviderClient {
    pub(crate) fn new(timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Exchange an authorization code at the provider's token endpoint.
    pub(crate) async fn exchange_code(
        &self,
        provider: &OAuthProvider,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet, Error> {
        const OPERATION: &str = "token exchange";

        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        let mut request = self
            .http
            .post(provider.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json");

        let secret = provider.client_secret.as_deref();
        match provider.client_auth {
            ClientAuthMethod::ClientSecretBasic => {
                // RFC 6749 §2.3.1: credentials are form-encoded before Basic encoding.
                request = request.basic_auth(
                    urlencoding::encode(&provider.client_id),
                    secret.map(urlencoding::encode),
                );
            }
            ClientAuthMethod::ClientSecretPost => {
                params.push(("client_id", provider.client_id.as_str()));
                if let Some(secret) = secret {
                    params.push(("client_secret", secret));
                }
            }
        }

        let response = request
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(OPERATION, &e))?;
        let response = Self::ensure_success(response, OPERATION).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| transport_error(OPERATION, &e))?;

        // Some providers answer 200 with an OAuth error body.
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(Error::OAuthCallback {
                operation: OPERATION,
                status: None,
                detail: error.to_owned(),
            });
        }

        serde_json::from_value(body).map_err(|e| Error::OAuthCallback {
            operation: OPERATION,
            status: None,
            detail: format!("unexpected token response: {e}"),
        })
    }

    /// Fetch the raw profile from a userinfo endpoint with the bearer token.
    pub(crate) async fn user_info(&self, url: &Url, access_token: &str) -> Result<Value, Error> {
        const OPERATION: &str = "userinfo request";

        let response = self
            .http
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(OPERATION, &e))?;
        let response = Self::ensure_success(response, OPERATION).await?;
        response
            .json()
            .await
            .map_err(|e| transport_error(OPERATION, &e))
    }

    pub(crate) async fn fetch_jwks(&self, url: &Url) -> Result<JwkSet, Error> {
        const OPERATION: &str = "JWKS fetch";

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| transport_error(OPERATION, &e))?;
        let response = Self::ensure_success(response, OPERATION).await?;
        response
            .json()
            .await
            .map_err(|e| transport_error(OPERATION, &e))
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(operation, status, "Provider endpoint returned an error");
        Err(Error::OAuthCallback {
            operation,
            status: Some(status),
            detail: body,
        })
    }
}

fn transport_error(operation: &'static str, e: &reqwest::Error) -> Error {
    tracing::warn!(operation, error = %e, "Provider request failed");
    Error::OAuthCallback {
        operation,
        status: e.status().map(|s| s.as_u16()),
        detail: if e.is_timeout() {
            "timed out".into()
        } else {
            e.to_string()
        },
    }
}
