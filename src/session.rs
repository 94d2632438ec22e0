//! Session issuance, lookup with rolling refresh, and sign-out.

use cookie::Cookie;
use time::OffsetDateTime;

use crate::callbacks::{AuthEvent, JwtContext, JwtTrigger, SessionSource, SignOutSubject};
use crate::config::{AuthOptions, SessionStrategy};
use crate::cookies::{self, RequestCookies};
use crate::error::Error;
use crate::jwt::{self, JwtClaims};
use crate::types::{
    Account, Profile, Session, SessionRecord, SessionToken, SessionUser, User, UserId,
};

/// Result of reading the session cookie.
#[derive(Debug, Default)]
pub struct SessionLookup {
    pub session: Option<Session>,
    /// Refreshed or cleared session cookies to send back.
    pub cookies: Vec<Cookie<'static>>,
}

/// Result of sign-out. The cookies are always present, even when `error` is set.
#[derive(Debug)]
pub struct SignOutOutcome {
    pub cookies: Vec<Cookie<'static>>,
    pub error: Option<Error>,
}

/// Whether a `database` session is due for an expiry extension.
///
/// The session was last extended at `expires - max_age`; it is due once
/// `update_age` has passed since then.
pub(crate) fn refresh_due(
    options: &AuthOptions,
    expires: OffsetDateTime,
    now: OffsetDateTime,
) -> bool {
    expires - options.session.max_age + options.session.update_age <= now
}

fn session_cookie_name(options: &AuthOptions) -> &str {
    &options.cookies.names.session_token
}

fn read_session_cookie(options: &AuthOptions, cookies: &RequestCookies) -> Option<String> {
    match cookies::reassemble(session_cookie_name(options), cookies) {
        Ok(value) => value.filter(|v| !v.is_empty()),
        Err(e) => {
            tracing::warn!(error = %e, "Session cookie could not be reassembled");
            None
        }
    }
}

/// Issues a session for `user` and returns the cookies that carry it.
///
/// # Errors
///
/// Returns [`Error::InvalidSession`] if the JWT cannot be signed, or
/// [`Error::Adapter`] if the session record cannot be stored.
pub async fn issue(
    options: &AuthOptions,
    user: &User,
    account: Option<&Account>,
    profile: Option<&Profile>,
    is_new_user: bool,
    existing: &RequestCookies,
) -> Result<Vec<Cookie<'static>>, Error> {
    let name = session_cookie_name(options);
    let max_age = options.session.max_age;

    match options.session.strategy {
        SessionStrategy::Jwt => {
            let ctx = JwtContext {
                trigger: if is_new_user {
                    JwtTrigger::SignUp
                } else {
                    JwtTrigger::SignIn
                },
                user: Some(user),
                account,
                profile,
            };
            let claims = options.callbacks.jwt(JwtClaims::from_user(user), &ctx);
            let token = jwt::encode(&claims, &options.secrets, name, max_age)?;
            Ok(options.cookies.chunked(name, &token, Some(max_age), existing))
        }
        SessionStrategy::Database => {
            let adapter = options.adapter()?;
            let record = adapter
                .create_session(SessionRecord {
                    session_token: SessionToken::generate(),
                    user_id: user.id.clone(),
                    expires: OffsetDateTime::now_utc() + max_age,
                })
                .await?;
            Ok(options.cookies.chunked(
                name,
                record.session_token.as_str(),
                Some(max_age),
                existing,
            ))
        }
    }
}

/// Looks up and validates a `database` session.
///
/// # Errors
///
/// Returns [`Error::SessionExpired`] when the record is missing or past its
/// expiry (an expired record is deleted), or [`Error::Adapter`].
pub(crate) async fn load_database_session(
    options: &AuthOptions,
    token: &SessionToken,
) -> Result<(SessionRecord, User), Error> {
    let adapter = options.adapter()?;
    let (record, user) = adapter
        .get_session_and_user(token)
        .await?
        .ok_or(Error::SessionExpired)?;
    if record.expires <= OffsetDateTime::now_utc() {
        adapter.delete_session(token).await?;
        return Err(Error::SessionExpired);
    }
    Ok((record, user))
}

/// Reads the session cookie and returns the public session.
///
/// `jwt`: the token is decoded, reshaped by the `jwt` and `session`
/// callbacks, and re-issued with a fresh expiry. `database`: the record is
/// loaded and its expiry extended once `update_age` has elapsed. An invalid
/// or expired session clears the cookie and yields no session.
///
/// # Errors
///
/// Returns [`Error::Adapter`] if storage fails, or [`Error::InvalidSession`]
/// if the refreshed JWT cannot be signed.
pub async fn get_session(
    options: &AuthOptions,
    cookies: &RequestCookies,
) -> Result<SessionLookup, Error> {
    let Some(value) = read_session_cookie(options, cookies) else {
        return Ok(SessionLookup::default());
    };
    let name = session_cookie_name(options);
    let max_age = options.session.max_age;

    match options.session.strategy {
        SessionStrategy::Jwt => {
            let claims = match jwt::decode(&value, &options.secrets, name) {
                Ok(claims) => claims,
                Err(e) => {
                    tracing::debug!(error = %e, "Discarding invalid session token");
                    return Ok(SessionLookup {
                        session: None,
                        cookies: options.cookies.clear_chunked(name, cookies),
                    });
                }
            };

            let ctx = JwtContext {
                trigger: JwtTrigger::Session,
                user: None,
                account: None,
                profile: None,
            };
            let claims = options.callbacks.jwt(claims, &ctx);
            let expires = OffsetDateTime::now_utc() + max_age;
            let session = options
                .callbacks
                .session(claims.to_session(expires), SessionSource::Jwt(&claims));

            let token = jwt::encode(&claims, &options.secrets, name, max_age)?;
            options.events.emit(&AuthEvent::Session(&session));
            Ok(SessionLookup {
                session: Some(session),
                cookies: options.cookies.chunked(name, &token, Some(max_age), cookies),
            })
        }
        SessionStrategy::Database => {
            let token = SessionToken(value);
            let (mut record, user) = match load_database_session(options, &token).await {
                Ok(found) => found,
                Err(Error::SessionExpired) => {
                    return Ok(SessionLookup {
                        session: None,
                        cookies: options.cookies.clear_chunked(name, cookies),
                    });
                }
                Err(e) => return Err(e),
            };

            let now = OffsetDateTime::now_utc();
            let mut out = Vec::new();
            if refresh_due(options, record.expires, now) {
                let extended = now + max_age;
                options
                    .adapter()?
                    .update_session_expiry(&token, extended)
                    .await?;
                record.expires = extended;
                out = options
                    .cookies
                    .chunked(name, token.as_str(), Some(max_age), cookies);
                tracing::debug!(user_id = %user.id, "Extended session expiry");
            }

            let session = Session {
                user: SessionUser {
                    id: Some(user.id.0.clone()),
                    name: user.name.clone(),
                    email: user.email.clone(),
                    image: user.image.clone(),
                },
                expires: record.expires,
            };
            let session = options
                .callbacks
                .session(session, SessionSource::Database(&user));
            options.events.emit(&AuthEvent::Session(&session));
            Ok(SessionLookup {
                session: Some(session),
                cookies: out,
            })
        }
    }
}

/// The currently signed-in user, if any. Lookup failures yield `None`.
pub(crate) async fn current_user(options: &AuthOptions, cookies: &RequestCookies) -> Option<User> {
    let value = read_session_cookie(options, cookies)?;
    match options.session.strategy {
        SessionStrategy::Jwt => {
            let claims =
                jwt::decode(&value, &options.secrets, session_cookie_name(options)).ok()?;
            Some(User {
                id: UserId(claims.sub?),
                name: claims.name,
                email: claims.email,
                email_verified: None,
                image: claims.picture,
            })
        }
        SessionStrategy::Database => {
            load_database_session(options, &SessionToken(value))
                .await
                .ok()
                .map(|(_, user)| user)
        }
    }
}

/// Ends the session.
///
/// `jwt`: the token is decoded best-effort for the `sign_out` event.
/// `database`: the record is deleted; a storage failure is reported in
/// [`SignOutOutcome::error`]. The session cookie and its chunks are cleared
/// in every case.
pub async fn sign_out(options: &AuthOptions, cookies: &RequestCookies) -> SignOutOutcome {
    let name = session_cookie_name(options);
    let clear = options.cookies.clear_chunked(name, cookies);
    let value = read_session_cookie(options, cookies);

    let error = match options.session.strategy {
        SessionStrategy::Jwt => {
            let claims = value
                .as_deref()
                .and_then(|token| jwt::decode(token, &options.secrets, name).ok());
            options
                .events
                .emit(&AuthEvent::SignOut(SignOutSubject::Jwt(claims.as_ref())));
            None
        }
        SessionStrategy::Database => {
            let token = value.map(SessionToken);
            let mut error = None;
            if let Some(token) = &token {
                let deleted = match options.adapter() {
                    Ok(adapter) => adapter.delete_session(token).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = deleted {
                    tracing::warn!(error = %e, "Session deletion failed during sign-out");
                    error = Some(Error::SignOut(e.to_string()));
                }
            }
            options
                .events
                .emit(&AuthEvent::SignOut(SignOutSubject::Database(token.as_ref())));
            error
        }
    };

    SignOutOutcome {
        cookies: clear,
        error,
    }
}
