#![doc = include_str!("../README.md")]

pub mod actions;
pub mod adapter;
pub mod callback_url;
pub mod callbacks;
pub mod checks;
pub mod config;
pub mod cookies;
pub mod csrf;
pub mod error;
pub mod identity;
pub mod jwt;
#[cfg(feature = "axum")]
pub mod middleware;
pub mod oauth;
pub mod pkce;
pub mod provider;
pub mod providers;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use actions::{Auth, AuthAction, AuthRequest, AuthResponse};
pub use adapter::Adapter;
pub use callbacks::{
    AuthEvent, Callbacks, Events, JwtContext, JwtTrigger, SessionSource, SignInDecision,
    SignOutSubject, default_redirect,
};
pub use config::{AuthOptions, Pages, Secrets, SessionOptions, SessionStrategy};
pub use cookies::{CookieNames, CookiePolicy, RequestCookies};
pub use error::{BoxError, Error, ErrorCode};
pub use jwt::JwtClaims;
pub use provider::{
    Checks, ClientAuthMethod, CredentialsProvider, OAuthProvider, Provider, ProviderKind,
};
pub use session::{SessionLookup, SignOutOutcome};
pub use types::{
    Account, NewUser, Profile, Session, SessionRecord, SessionToken, SessionUser, TokenSet, User,
    UserId,
};
