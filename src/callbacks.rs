//! User-supplied policy callbacks and best-effort event hooks.

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::error::BoxError;
use crate::jwt::JwtClaims;
use crate::types::{Account, Profile, Session, SessionToken, User};

/// `redirect(url, base_url) -> absolute URL`. Implementations must not return
/// cross-origin targets unless they are explicitly allow-listed.
pub type RedirectFn = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Gate evaluated after the identity is known and before a session is issued.
pub type SignInFn =
    Arc<dyn Fn(&User, Option<&Account>, Option<&Profile>) -> SignInDecision + Send + Sync>;

/// Shapes the JWT claims on sign-in and on every session read.
pub type JwtFn = Arc<dyn Fn(JwtClaims, &JwtContext<'_>) -> JwtClaims + Send + Sync>;

/// Shapes the public session returned by `GET /session`.
pub type SessionFn = Arc<dyn Fn(Session, SessionSource<'_>) -> Session + Send + Sync>;

/// Receives [`AuthEvent`]s. Errors are logged and otherwise ignored.
pub type EventFn = Arc<dyn Fn(&AuthEvent<'_>) -> Result<(), BoxError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInDecision {
    Allow,
    Deny,
    /// Abort the sign-in and send the browser here instead.
    Redirect(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtTrigger {
    SignIn,
    SignUp,
    Session,
}

/// Inputs available to the `jwt` callback.
#[derive(Debug)]
pub struct JwtContext<'a> {
    pub trigger: JwtTrigger,
    pub user: Option<&'a User>,
    pub account: Option<&'a Account>,
    pub profile: Option<&'a Profile>,
}

/// What backs the session handed to the `session` callback.
#[derive(Debug, Clone, Copy)]
pub enum SessionSource<'a> {
    Jwt(&'a JwtClaims),
    Database(&'a User),
}

/// What sign-out knew about the session it ended.
#[derive(Debug, Clone, Copy)]
pub enum SignOutSubject<'a> {
    Jwt(Option<&'a JwtClaims>),
    Database(Option<&'a SessionToken>),
}

#[derive(Debug)]
pub enum AuthEvent<'a> {
    SignIn {
        user: &'a User,
        account: Option<&'a Account>,
        is_new_user: bool,
    },
    SignOut(SignOutSubject<'a>),
    CreateUser(&'a User),
    LinkAccount {
        user: &'a User,
        account: &'a Account,
    },
    Session(&'a Session),
}

impl AuthEvent<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::SignIn { .. } => "sign_in",
            Self::SignOut(_) => "sign_out",
            Self::CreateUser(_) => "create_user",
            Self::LinkAccount { .. } => "link_account",
            Self::Session(_) => "session",
        }
    }
}

/// Same-origin redirect policy.
///
/// Relative paths are joined to `base_url`; absolute URLs survive only when
/// their origin equals the base origin; anything else yields `base_url`.
#[must_use]
pub fn default_redirect(url: &str, base_url: &str) -> String {
    if url.starts_with('/') {
        return format!("{}{url}", base_url.trim_end_matches('/'));
    }
    match (Url::parse(url), Url::parse(base_url)) {
        (Ok(target), Ok(base)) if target.origin() == base.origin() => url.to_owned(),
        _ => base_url.to_owned(),
    }
}

#[derive(Clone)]
pub struct Callbacks {
    pub(crate) redirect: RedirectFn,
    pub(crate) sign_in: Option<SignInFn>,
    pub(crate) jwt: Option<JwtFn>,
    pub(crate) session: Option<SessionFn>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            redirect: Arc::new(default_redirect),
            sign_in: None,
            jwt: None,
            session: None,
        }
    }
}

impl Callbacks {
    #[must_use]
    pub fn with_redirect<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.redirect = Arc::new(f);
        self
    }

    #[must_use]
    pub fn with_sign_in<F>(mut self, f: F) -> Self
    where
        F: Fn(&User, Option<&Account>, Option<&Profile>) -> SignInDecision + Send + Sync + 'static,
    {
        self.sign_in = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_jwt<F>(mut self, f: F) -> Self
    where
        F: Fn(JwtClaims, &JwtContext<'_>) -> JwtClaims + Send + Sync + 'static,
    {
        self.jwt = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_session<F>(mut self, f: F) -> Self
    where
        F: Fn(Session, SessionSource<'_>) -> Session + Send + Sync + 'static,
    {
        self.session = Some(Arc::new(f));
        self
    }

    pub(crate) fn redirect(&self, url: &str, base_url: &str) -> String {
        (self.redirect)(url, base_url)
    }

    pub(crate) fn sign_in(
        &self,
        user: &User,
        account: Option<&Account>,
        profile: Option<&Profile>,
    ) -> SignInDecision {
        self.sign_in
            .as_ref()
            .map_or(SignInDecision::Allow, |f| f(user, account, profile))
    }

    pub(crate) fn jwt(&self, claims: JwtClaims, ctx: &JwtContext<'_>) -> JwtClaims {
        match &self.jwt {
            Some(f) => f(claims, ctx),
            None => claims,
        }
    }

    pub(crate) fn session(&self, session: Session, source: SessionSource<'_>) -> Session {
        match &self.session {
            Some(f) => f(session, source),
            None => session,
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("sign_in", &self.sign_in.is_some())
            .field("jwt", &self.jwt.is_some())
            .field("session", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default)]
pub struct Events {
    handler: Option<EventFn>,
}

impl Events {
    #[must_use]
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&AuthEvent<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Arc::new(handler)),
        }
    }

    pub(crate) fn emit(&self, event: &AuthEvent<'_>) {
        if let Some(handler) = &self.handler
            && let Err(e) = handler(event)
        {
            tracing::warn!(event = event.name(), error = %e, "Event handler failed");
        }
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("handler", &self.handler.is_some())
            .finish()
    }
}
