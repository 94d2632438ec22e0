use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use time::Duration;
use url::Url;

use crate::adapter::{Adapter, AdapterHandle};
use crate::callbacks::{Callbacks, Events};
use crate::cookies::{CookieNames, CookiePolicy};
use crate::error::Error;
use crate::provider::{Provider, ProviderKind};

const DEFAULT_HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
const DEFAULT_ADAPTER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Signing secrets, newest first. The newest signs; every entry verifies.
#[derive(Clone)]
pub struct Secrets(Arc<[String]>);

impl Secrets {
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no non-empty secret is given.
    pub fn new<I, S>(secrets: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let secrets: Vec<String> = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.is_empty())
            .collect();
        if secrets.is_empty() {
            return Err(Error::Configuration("at least one secret is required".into()));
        }
        Ok(Self(secrets.into()))
    }

    pub(crate) fn current(&self) -> &str {
        &self.0[0]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secrets([redacted; {}])", self.0.len())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStrategy {
    /// Self-contained signed token in the session cookie.
    #[default]
    Jwt,
    /// Opaque token in the cookie; the record lives in the adapter.
    Database,
}

impl FromStr for SessionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jwt" => Ok(Self::Jwt),
            "database" => Ok(Self::Database),
            other => Err(Error::Configuration(format!(
                "unknown session strategy '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub strategy: SessionStrategy,
    /// Session lifetime (default 30 days).
    pub max_age: Duration,
    /// Minimum interval between expiry extensions (default 24 hours).
    pub update_age: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            strategy: SessionStrategy::default(),
            max_age: Duration::days(30),
            update_age: Duration::hours(24),
        }
    }
}

/// Custom page URLs. Unset pages fall back to built-in action URLs.
#[derive(Debug, Clone, Default)]
pub struct Pages {
    pub sign_in: Option<String>,
    pub sign_out: Option<String>,
    pub error: Option<String>,
}

/// Resolved configuration, immutable for the lifetime of an [`Auth`](crate::Auth).
///
/// Required fields (`url`, `secrets`) are constructor parameters; everything
/// else has a default and a `with_*` override.
///
/// ```rust,ignore
/// let options = AuthOptions::new("https://app.example.com".parse()?, Secrets::new([secret])?)
///     .with_provider(providers::github(id, secret))
///     .with_session_strategy(SessionStrategy::Database)
///     .with_adapter(my_store);
/// ```
#[derive(Clone)]
pub struct AuthOptions {
    pub(crate) url: Url,
    pub(crate) base_path: String,
    pub(crate) secrets: Secrets,
    pub(crate) providers: Vec<Provider>,
    pub(crate) session: SessionOptions,
    pub(crate) cookies: CookiePolicy,
    pub(crate) pages: Pages,
    pub(crate) callbacks: Callbacks,
    pub(crate) events: Events,
    pub(crate) adapter: Option<AdapterHandle>,
    pub(crate) skip_csrf_check: bool,
    pub(crate) http_timeout: std::time::Duration,
    pub(crate) adapter_timeout: std::time::Duration,
}

impl AuthOptions {
    /// `url` is the public origin of the application; cookies are marked
    /// `Secure` when it is `https`.
    #[must_use]
    pub fn new(url: Url, secrets: Secrets) -> Self {
        let secure = url.scheme() == "https";
        Self {
            url,
            base_path: "/api/auth".into(),
            secrets,
            providers: Vec::new(),
            session: SessionOptions::default(),
            cookies: CookiePolicy::new(secure),
            pages: Pages::default(),
            callbacks: Callbacks::default(),
            events: Events::default(),
            adapter: None,
            skip_csrf_check: false,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
        }
    }

    /// Create options from environment variables.
    ///
    /// # Required env vars
    /// - `AUTH_URL`: public origin of the application
    /// - `AUTH_SECRET`: comma-separated secrets, newest first
    ///
    /// # Optional env vars
    /// - `AUTH_BASE_PATH`: mount path of the auth routes (default `/api/auth`)
    /// - `AUTH_SESSION_STRATEGY`: `jwt` or `database`
    /// - `AUTH_SESSION_MAX_AGE`: session lifetime in seconds
    /// - `AUTH_SESSION_UPDATE_AGE`: refresh interval in seconds
    /// - `AUTH_TRUST_HTTPS`: `"1"`/`"true"` forces `Secure` cookies (TLS terminated upstream)
    ///
    /// Providers, callbacks and the adapter are added with the `with_*` methods.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if required vars are missing or malformed.
    pub fn from_env() -> Result<Self, Error> {
        let url_str = std::env::var("AUTH_URL")
            .map_err(|_| Error::Configuration("AUTH_URL is required".into()))?;
        let url: Url = url_str
            .parse()
            .map_err(|e| Error::Configuration(format!("AUTH_URL: {e}")))?;
        let secret = std::env::var("AUTH_SECRET")
            .map_err(|_| Error::Configuration("AUTH_SECRET is required".into()))?;
        let secrets = Secrets::new(secret.split(',').map(str::trim))?;

        let mut options = Self::new(url, secrets);

        if let Ok(path) = std::env::var("AUTH_BASE_PATH") {
            options = options.with_base_path(path);
        }
        if let Ok(strategy) = std::env::var("AUTH_SESSION_STRATEGY") {
            options = options.with_session_strategy(strategy.parse()?);
        }
        if let Ok(secs) = std::env::var("AUTH_SESSION_MAX_AGE") {
            options.session.max_age = parse_seconds("AUTH_SESSION_MAX_AGE", &secs)?;
        }
        if let Ok(secs) = std::env::var("AUTH_SESSION_UPDATE_AGE") {
            options.session.update_age = parse_seconds("AUTH_SESSION_UPDATE_AGE", &secs)?;
        }
        if matches!(
            std::env::var("AUTH_TRUST_HTTPS").as_deref(),
            Ok("1") | Ok("true"),
        ) {
            options = options.with_secure_cookies(true);
        }

        Ok(options)
    }

    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.base_path = path.trim_end_matches('/').to_owned();
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<Provider>) -> Self {
        self.providers.push(provider.into());
        self
    }

    #[must_use]
    pub fn with_session_strategy(mut self, strategy: SessionStrategy) -> Self {
        self.session.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_session_max_age(mut self, max_age: Duration) -> Self {
        self.session.max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_session_update_age(mut self, update_age: Duration) -> Self {
        self.session.update_age = update_age;
        self
    }

    /// Force `Secure` cookies (and their name prefixes) on or off.
    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.cookies.secure = secure;
        self.cookies.names = CookieNames::defaults(secure);
        self
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: impl Into<String>) -> Self {
        self.cookies.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_cookie_names(mut self, names: CookieNames) -> Self {
        self.cookies.names = names;
        self
    }

    #[must_use]
    pub fn with_pages(mut self, pages: Pages) -> Self {
        self.pages = pages;
        self
    }

    #[must_use]
    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Events) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_adapter<A: Adapter>(mut self, adapter: A) -> Self {
        self.adapter = Some(AdapterHandle::new(adapter, self.adapter_timeout));
        self
    }

    /// Disable CSRF verification. Only for hosts that enforce their own CSRF defense.
    #[must_use]
    pub fn with_skip_csrf_check(mut self, skip: bool) -> Self {
        self.skip_csrf_check = skip;
        self
    }

    /// Timeout for each outbound provider request.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Timeout for each adapter call.
    #[must_use]
    pub fn with_adapter_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.adapter_timeout = timeout;
        if let Some(adapter) = &mut self.adapter {
            adapter.set_timeout(timeout);
        }
        self
    }

    #[must_use]
    pub fn session_options(&self) -> &SessionOptions {
        &self.session
    }

    #[must_use]
    pub fn cookie_policy(&self) -> &CookiePolicy {
        &self.cookies
    }

    /// Public origin without a trailing slash, e.g. `https://app.example.com`.
    pub(crate) fn base_url(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// Absolute URL of an auth action, e.g. `https://app/api/auth/signin`.
    pub(crate) fn action_url(&self, action: &str) -> String {
        format!("{}{}/{action}", self.base_url(), self.base_path)
    }

    /// `redirect_uri` registered with a provider.
    pub(crate) fn provider_callback_url(&self, provider_id: &str) -> String {
        self.action_url(&format!("callback/{provider_id}"))
    }

    pub(crate) fn error_page(&self) -> String {
        self.pages
            .error
            .clone()
            .unwrap_or_else(|| self.action_url("error"))
    }

    pub(crate) fn provider(&self, id: &str) -> Result<&Provider, Error> {
        self.providers
            .iter()
            .find(|p| p.id() == id)
            .ok_or_else(|| Error::UnknownProvider(id.to_owned()))
    }

    pub(crate) fn adapter(&self) -> Result<&AdapterHandle, Error> {
        self.adapter
            .as_ref()
            .ok_or_else(|| Error::Configuration("this operation requires an adapter".into()))
    }

    /// Startup validation; every failure is fatal.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if !self.base_path.starts_with('/') {
            return Err(Error::Configuration(format!(
                "base path '{}' must start with '/'",
                self.base_path
            )));
        }
        if self.session.max_age <= Duration::ZERO {
            return Err(Error::Configuration("session max_age must be positive".into()));
        }
        if self.session.update_age > self.session.max_age {
            return Err(Error::Configuration(
                "session update_age must not exceed max_age".into(),
            ));
        }
        if self.session.strategy == SessionStrategy::Database && self.adapter.is_none() {
            return Err(Error::Configuration(
                "the database session strategy requires an adapter".into(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id()) {
                return Err(Error::Configuration(format!(
                    "duplicate provider id '{}'",
                    provider.id()
                )));
            }
            match provider {
                Provider::Credentials(_) if self.session.strategy == SessionStrategy::Database => {
                    return Err(Error::Configuration(format!(
                        "credentials provider '{}' requires the jwt session strategy",
                        provider.id()
                    )));
                }
                Provider::OAuth(p) if p.client_id.is_empty() => {
                    return Err(Error::Configuration(format!(
                        "provider '{}' has no client id",
                        p.id
                    )));
                }
                Provider::OAuth(p) if p.kind == ProviderKind::Oidc && p.issuer.is_none() => {
                    return Err(Error::Configuration(format!(
                        "OIDC provider '{}' has no issuer",
                        p.id
                    )));
                }
                Provider::OAuth(p) if p.kind == ProviderKind::OAuth && p.userinfo_url.is_none() => {
                    return Err(Error::Configuration(format!(
                        "OAuth provider '{}' has no userinfo endpoint",
                        p.id
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl fmt::Debug for AuthOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthOptions")
            .field("url", &self.url.as_str())
            .field("base_path", &self.base_path)
            .field("secrets", &self.secrets)
            .field("providers", &self.providers)
            .field("session", &self.session)
            .field("adapter", &self.adapter.is_some())
            .field("skip_csrf_check", &self.skip_csrf_check)
            .finish_non_exhaustive()
    }
}

fn parse_seconds(var: &str, value: &str) -> Result<Duration, Error> {
    value
        .trim()
        .parse::<i64>()
        .map(Duration::seconds)
        .map_err(|e| Error::Configuration(format!("{var}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CredentialsProvider;
    use crate::testing::{MemoryAdapter, test_options, test_secrets};

    #[test]
    fn test_secrets_reject_empty() {
        assert!(matches!(
            Secrets::new(Vec::<String>::new()),
            Err(Error::Configuration(_))
        ));
        assert!(Secrets::new([""]).is_err());
    }

    #[test]
    fn test_secrets_debug_is_redacted() {
        let debug = format!("{:?}", test_secrets());
        assert!(!debug.contains("unit-test-secret"));
    }

    #[test]
    fn test_defaults() {
        let options = test_options();
        assert_eq!(options.base_url(), "http://localhost:3000");
        assert_eq!(
            options.provider_callback_url("github"),
            "http://localhost:3000/api/auth/callback/github"
        );
        assert_eq!(options.error_page(), "http://localhost:3000/api/auth/error");
        assert!(!options.cookies.secure);
        assert_eq!(options.session.max_age, Duration::days(30));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_https_url_enables_secure_cookies() {
        let options = AuthOptions::new("https://app.example.com".parse().unwrap(), test_secrets());
        assert!(options.cookies.secure);
        assert_eq!(options.cookies.names.session_token, "__Secure-auth.session-token");
    }

    #[test]
    fn test_database_strategy_requires_adapter() {
        let options = test_options().with_session_strategy(SessionStrategy::Database);
        assert!(matches!(options.validate(), Err(Error::Configuration(_))));

        let options = options.with_adapter(MemoryAdapter::default());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_credentials_require_jwt_strategy() {
        let options = test_options()
            .with_adapter(MemoryAdapter::default())
            .with_session_strategy(SessionStrategy::Database)
            .with_provider(CredentialsProvider::new("password", "Password", |_| None));
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_duplicate_provider_ids_rejected() {
        let options = test_options()
            .with_provider(CredentialsProvider::new("dup", "A", |_| None))
            .with_provider(CredentialsProvider::new("dup", "B", |_| None));
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_update_age_must_not_exceed_max_age() {
        let options = test_options()
            .with_session_max_age(Duration::hours(1))
            .with_session_update_age(Duration::hours(2));
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_session_strategy_parse() {
        assert_eq!("jwt".parse::<SessionStrategy>().unwrap(), SessionStrategy::Jwt);
        assert_eq!(
            "database".parse::<SessionStrategy>().unwrap(),
            SessionStrategy::Database
        );
        assert!("redis".parse::<SessionStrategy>().is_err());
    }

    #[test]
    fn test_base_path_trailing_slash_trimmed() {
        let options = test_options().with_base_path("/auth/");
        assert_eq!(options.action_url("csrf"), "http://localhost:3000/auth/csrf");
    }
}
