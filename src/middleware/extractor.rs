use axum::extract::{FromRef, FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;

use super::cookies;
use super::error::AuthRejection;
use crate::actions::Auth;
use crate::types::Session;

/// Session of the signed-in user.
///
/// Use as an Axum extractor in route handlers. Returns `401 Unauthorized`
/// if no valid session exists. The router state must provide an [`Auth`]
/// through [`FromRef`].
///
/// # Example
///
/// ```rust,ignore
/// async fn protected(AuthSession(session): AuthSession) -> impl IntoResponse {
///     format!("Hello, {}", session.user.email.unwrap_or_default())
/// }
///
/// // Optional: accessible to both authenticated and anonymous users
/// async fn public(session: Option<AuthSession>) -> impl IntoResponse {
///     match session {
///         Some(AuthSession(s)) => format!("Hello, {:?}", s.user.name),
///         None => "Hello, guest".to_string(),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthSession(pub Session);

/// Reads the session from request cookies.
///
/// Refreshed session cookies are not written here; clients refresh through
/// `GET {base_path}/session`.
///
/// # Errors
///
/// - [`AuthRejection::SessionExpired`] if a session cookie was sent but no
///   valid session backs it.
/// - [`AuthRejection::Internal`] if the lookup itself failed.
pub async fn resolve_session(
    auth: &Auth,
    jar: &CookieJar,
) -> Result<Option<Session>, AuthRejection> {
    let request_cookies = cookies::request_cookies(jar);
    let lookup = auth.get_session(&request_cookies).await?;
    match lookup.session {
        Some(session) => Ok(Some(session)),
        None if cookies::has_session_cookie(
            &request_cookies,
            &auth.options().cookies.names.session_token,
        ) =>
        {
            Err(AuthRejection::SessionExpired)
        }
        None => Ok(None),
    }
}

impl<S> FromRequestParts<S> for AuthSession
where
    Auth: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Auth::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        resolve_session(&auth, &jar)
            .await?
            .map(Self)
            .ok_or(AuthRejection::Unauthenticated)
    }
}

impl<S> OptionalFromRequestParts<S> for AuthSession
where
    Auth: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let auth = Auth::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        match resolve_session(&auth, &jar).await {
            Ok(session) => Ok(session.map(Self)),
            Err(AuthRejection::SessionExpired) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
