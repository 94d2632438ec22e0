//! Ready-made descriptors for common identity providers.

use serde_json::Value;
use url::Url;

use crate::error::Error;
use crate::provider::{OAuthProvider, string_claim};
use crate::types::{Profile, TokenSet};

fn endpoint(s: &str) -> Url {
    s.parse().expect("valid provider endpoint")
}

/// GitHub (OAuth 2.0). Profile comes from `GET /user`.
#[must_use]
pub fn github(client_id: impl Into<String>, client_secret: impl Into<String>) -> OAuthProvider {
    OAuthProvider::oauth(
        "github",
        "GitHub",
        client_id,
        endpoint("https://github.com/login/oauth/authorize"),
        endpoint("https://github.com/login/oauth/access_token"),
        endpoint("https://api.github.com/user"),
    )
    .with_client_secret(client_secret)
    .with_scope("read:user user:email")
    .with_profile(github_profile)
}

fn github_profile(raw: &Value, _tokens: &TokenSet) -> Result<Profile, Error> {
    let id = string_claim(raw, "id").ok_or_else(|| Error::OAuthCallback {
        operation: "profile mapping",
        status: None,
        detail: "GitHub profile has no id".into(),
    })?;
    Ok(Profile {
        id,
        name: string_claim(raw, "name").or_else(|| string_claim(raw, "login")),
        email: string_claim(raw, "email"),
        image: string_claim(raw, "avatar_url"),
    })
}

/// Google (OpenID Connect). Email account linking stays off unless the
/// caller opts in with
/// [`with_dangerous_email_account_linking`](OAuthProvider::with_dangerous_email_account_linking).
#[must_use]
pub fn google(client_id: impl Into<String>, client_secret: impl Into<String>) -> OAuthProvider {
    OAuthProvider::oidc(
        "google",
        "Google",
        client_id,
        "https://accounts.google.com",
        endpoint("https://accounts.google.com/o/oauth2/v2/auth"),
        endpoint("https://oauth2.googleapis.com/token"),
        endpoint("https://www.googleapis.com/oauth2/v3/certs"),
    )
    .with_client_secret(client_secret)
}
