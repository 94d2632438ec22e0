//! Provider descriptors.
//!
//! A provider is plain data plus a pure profile-mapping function. The
//! authorization builder and the token exchanger consume every descriptor the
//! same way; nothing is provider-specific beyond what is declared here.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::error::Error;
use crate::types::{Profile, TokenSet, User};

/// Maps a provider's raw profile (userinfo or ID-token claims) into a [`Profile`].
pub type ProfileFn = Arc<dyn Fn(&Value, &TokenSet) -> Result<Profile, Error> + Send + Sync>;

/// Validates submitted credentials; `None` rejects the sign-in.
pub type AuthorizeFn = Arc<dyn Fn(&HashMap<String, String>) -> Option<User> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OAuth,
    Oidc,
    Credentials,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OAuth => "oauth",
            Self::Oidc => "oidc",
            Self::Credentials => "credentials",
        }
    }
}

/// Protocol checks a provider declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checks {
    pub state: bool,
    pub nonce: bool,
    pub pkce: bool,
}

impl Checks {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn all() -> Self {
        Self {
            state: true,
            nonce: true,
            pkce: true,
        }
    }

    #[must_use]
    pub fn state_and_pkce() -> Self {
        Self {
            state: true,
            nonce: false,
            pkce: true,
        }
    }
}

/// How client credentials are presented to the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// HTTP Basic with `client_id:client_secret`.
    #[default]
    ClientSecretBasic,
    /// `client_id` and `client_secret` in the form body.
    ClientSecretPost,
}

/// OAuth 2.0 or OpenID Connect provider descriptor.
#[derive(Clone)]
#[non_exhaustive]
pub struct OAuthProvider {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) kind: ProviderKind,
    pub(crate) client_id: String,
    pub(crate) client_secret: Option<String>,
    pub(crate) authorization_url: Url,
    pub(crate) authorization_params: Vec<(String, String)>,
    pub(crate) token_url: Url,
    pub(crate) userinfo_url: Option<Url>,
    pub(crate) issuer: Option<String>,
    pub(crate) jwks_uri: Option<Url>,
    pub(crate) scope: String,
    pub(crate) checks: Checks,
    pub(crate) client_auth: ClientAuthMethod,
    pub(crate) allow_dangerous_email_account_linking: bool,
    pub(crate) profile: ProfileFn,
}

impl OAuthProvider {
    /// Plain OAuth 2.0 provider. Declares `state` and `pkce` checks by default;
    /// the profile is fetched from `userinfo_url`.
    #[must_use]
    pub fn oauth(
        id: impl Into<String>,
        name: impl Into<String>,
        client_id: impl Into<String>,
        authorization_url: Url,
        token_url: Url,
        userinfo_url: Url,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ProviderKind::OAuth,
            client_id: client_id.into(),
            client_secret: None,
            authorization_url,
            authorization_params: Vec::new(),
            token_url,
            userinfo_url: Some(userinfo_url),
            issuer: None,
            jwks_uri: None,
            scope: String::new(),
            checks: Checks::state_and_pkce(),
            client_auth: ClientAuthMethod::default(),
            allow_dangerous_email_account_linking: false,
            profile: Arc::new(default_profile),
        }
    }

    /// OpenID Connect provider. Declares `state`, `nonce` and `pkce`; the
    /// profile comes from the verified ID token claims.
    #[must_use]
    pub fn oidc(
        id: impl Into<String>,
        name: impl Into<String>,
        client_id: impl Into<String>,
        issuer: impl Into<String>,
        authorization_url: Url,
        token_url: Url,
        jwks_uri: Url,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ProviderKind::Oidc,
            client_id: client_id.into(),
            client_secret: None,
            authorization_url,
            authorization_params: Vec::new(),
            token_url,
            userinfo_url: None,
            issuer: Some(issuer.into()),
            jwks_uri: Some(jwks_uri),
            scope: "openid profile email".into(),
            checks: Checks::all(),
            client_auth: ClientAuthMethod::default(),
            allow_dangerous_email_account_linking: false,
            profile: Arc::new(default_profile),
        }
    }

    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    #[must_use]
    pub fn with_checks(mut self, checks: Checks) -> Self {
        self.checks = checks;
        self
    }

    /// Extra static query parameters for the authorization URL (e.g. `prompt`).
    #[must_use]
    pub fn with_authorization_param(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.authorization_params.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_userinfo_url(mut self, url: Url) -> Self {
        self.userinfo_url = Some(url);
        self
    }

    #[must_use]
    pub fn with_client_auth(mut self, method: ClientAuthMethod) -> Self {
        self.client_auth = method;
        self
    }

    #[must_use]
    pub fn with_profile<F>(mut self, profile: F) -> Self
    where
        F: Fn(&Value, &TokenSet) -> Result<Profile, Error> + Send + Sync + 'static,
    {
        self.profile = Arc::new(profile);
        self
    }

    /// Link a new provider account to an existing user with the same email.
    ///
    /// Only enable for providers that verify email ownership.
    #[must_use]
    pub fn with_dangerous_email_account_linking(mut self, allow: bool) -> Self {
        self.allow_dangerous_email_account_linking = allow;
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    #[must_use]
    pub fn checks(&self) -> Checks {
        self.checks
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }
}

impl fmt::Debug for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthProvider")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[redacted]"))
            .field("authorization_url", &self.authorization_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("issuer", &self.issuer)
            .field("checks", &self.checks)
            .finish_non_exhaustive()
    }
}

/// Username/password style provider backed by a consumer `authorize` function.
#[derive(Clone)]
pub struct CredentialsProvider {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) authorize: AuthorizeFn,
}

impl CredentialsProvider {
    #[must_use]
    pub fn new<F>(id: impl Into<String>, name: impl Into<String>, authorize: F) -> Self
    where
        F: Fn(&HashMap<String, String>) -> Option<User> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            authorize: Arc::new(authorize),
        }
    }
}

impl fmt::Debug for CredentialsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsProvider")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Provider {
    OAuth(OAuthProvider),
    Credentials(CredentialsProvider),
}

impl Provider {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::OAuth(p) => &p.id,
            Self::Credentials(p) => &p.id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::OAuth(p) => &p.name,
            Self::Credentials(p) => &p.name,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::OAuth(p) => p.kind,
            Self::Credentials(_) => ProviderKind::Credentials,
        }
    }
}

impl From<OAuthProvider> for Provider {
    fn from(p: OAuthProvider) -> Self {
        Self::OAuth(p)
    }
}

impl From<CredentialsProvider> for Provider {
    fn from(p: CredentialsProvider) -> Self {
        Self::Credentials(p)
    }
}

/// Standard-claims mapping: `sub`/`id` → id, `name`, `email`, `picture`/`image`.
///
/// # Errors
///
/// Returns [`Error::OAuthCallback`] when no usable id is present.
pub fn default_profile(raw: &Value, _tokens: &TokenSet) -> Result<Profile, Error> {
    let id = string_claim(raw, "sub")
        .or_else(|| string_claim(raw, "id"))
        .ok_or_else(|| Error::OAuthCallback {
            operation: "profile mapping",
            status: None,
            detail: "profile has no 'sub' or 'id'".into(),
        })?;

    Ok(Profile {
        id,
        name: string_claim(raw, "name"),
        email: string_claim(raw, "email"),
        image: string_claim(raw, "picture").or_else(|| string_claim(raw, "image")),
    })
}

/// Reads a claim as a string; numeric ids are stringified.
pub(crate) fn string_claim(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
