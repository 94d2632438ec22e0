use derive_more::Display;

/// Boxed error returned by consumer-provided collaborators (adapters, event hooks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A state-changing request arrived without a verified CSRF token.
    #[error("CSRF token was missing or did not match")]
    MissingCsrf,

    /// The `state` returned by the provider did not match the state cookie.
    #[error("OAuth state was missing, expired, or did not match")]
    InvalidState,

    /// The ID token `nonce` did not match the nonce cookie.
    #[error("OIDC nonce was missing or did not match")]
    InvalidNonce,

    /// A transient check cookie (PKCE verifier) was missing or expired.
    #[error("{0} cookie was missing or expired")]
    InvalidCheck(&'static str),

    /// The ID token failed signature or claim validation.
    #[error("ID token rejected: {reason}")]
    InvalidIdToken { reason: String },

    /// The provider redirected back with an `error` parameter.
    #[error("provider returned error '{code}'")]
    OAuthProvider { code: String, description: Option<String> },

    /// Network failure, timeout or non-2xx answer from a provider endpoint.
    #[error(
        "{operation} failed{}: {detail}",
        .status.map(|s| format!(" with status {s}")).unwrap_or_default()
    )]
    OAuthCallback {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },

    /// The identity belongs to another user and may not be linked automatically.
    #[error("account is not linked to the signed-in user")]
    AccountNotLinked,

    /// The `sign_in` callback refused the sign-in.
    #[error("sign-in was denied")]
    AccessDenied,

    /// A credentials provider refused the submitted credentials.
    #[error("credentials were rejected")]
    CredentialsSignin,

    /// The session record is missing or past its expiry.
    #[error("session expired")]
    SessionExpired,

    /// The session token could not be decoded or verified.
    #[error("invalid session token: {0}")]
    InvalidSession(String),

    /// A sealed value failed signature verification.
    #[error("invalid signature")]
    InvalidSignature,

    /// A cookie could not be parsed or reassembled.
    #[error("malformed cookie '{0}'")]
    MalformedCookie(String),

    /// The storage adapter failed or timed out.
    #[error("adapter error in {operation}: {detail}")]
    Adapter {
        operation: &'static str,
        detail: String,
    },

    /// Sign-out could not complete its revocation step.
    #[error("sign-out error: {0}")]
    SignOut(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// Invalid configuration; raised before any request is served.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub(crate) fn adapter(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Adapter {
            operation,
            detail: err.to_string(),
        }
    }

    pub(crate) fn invalid_id_token(reason: impl Into<String>) -> Self {
        Self::InvalidIdToken {
            reason: reason.into(),
        }
    }

    /// Coarse, client-safe code carried by error redirects.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingCsrf => ErrorCode::MissingCsrf,
            Self::InvalidState | Self::InvalidNonce | Self::InvalidCheck(_) => {
                ErrorCode::InvalidCheck
            }
            Self::InvalidIdToken { .. } | Self::OAuthCallback { .. } => ErrorCode::OAuthCallback,
            Self::OAuthProvider { code, .. } if code == "access_denied" => ErrorCode::AccessDenied,
            Self::OAuthProvider { .. } => ErrorCode::OAuthCallback,
            Self::AccountNotLinked => ErrorCode::OAuthAccountNotLinked,
            Self::AccessDenied => ErrorCode::AccessDenied,
            Self::CredentialsSignin => ErrorCode::CredentialsSignin,
            Self::SessionExpired | Self::InvalidSession(_) => ErrorCode::SessionRequired,
            Self::InvalidSignature | Self::MalformedCookie(_) => ErrorCode::Verification,
            Self::Adapter { .. } => ErrorCode::Adapter,
            Self::SignOut(_) => ErrorCode::SignOut,
            Self::UnknownProvider(_) | Self::UnknownAction(_) | Self::Configuration(_) => {
                ErrorCode::Configuration
            }
        }
    }
}

/// Error code exposed to clients in `?error=` redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorCode {
    #[display("MissingCSRF")]
    MissingCsrf,
    #[display("InvalidCheck")]
    InvalidCheck,
    #[display("OAuthCallback")]
    OAuthCallback,
    #[display("OAuthAccountNotLinked")]
    OAuthAccountNotLinked,
    #[display("AccessDenied")]
    AccessDenied,
    #[display("CredentialsSignin")]
    CredentialsSignin,
    #[display("SessionRequired")]
    SessionRequired,
    #[display("Verification")]
    Verification,
    #[display("AdapterError")]
    Adapter,
    #[display("SignOutError")]
    SignOut,
    #[display("Configuration")]
    Configuration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_coarse() {
        assert_eq!(Error::InvalidState.code(), ErrorCode::InvalidCheck);
        assert_eq!(Error::InvalidNonce.code(), ErrorCode::InvalidCheck);
        assert_eq!(
            Error::invalid_id_token("iss mismatch").code(),
            ErrorCode::OAuthCallback
        );
        assert_eq!(Error::AccountNotLinked.code().to_string(), "OAuthAccountNotLinked");
        assert_eq!(Error::MissingCsrf.code().to_string(), "MissingCSRF");
    }

    #[test]
    fn test_provider_access_denied_maps_to_access_denied() {
        let err = Error::OAuthProvider {
            code: "access_denied".into(),
            description: None,
        };
        assert_eq!(err.code(), ErrorCode::AccessDenied);

        let err = Error::OAuthProvider {
            code: "server_error".into(),
            description: Some("boom".into()),
        };
        assert_eq!(err.code(), ErrorCode::OAuthCallback);
    }

    #[test]
    fn test_callback_error_display_includes_status() {
        let err = Error::OAuthCallback {
            operation: "token exchange",
            status: Some(401),
            detail: "invalid_client".into(),
        };
        assert_eq!(
            err.to_string(),
            "token exchange failed with status 401: invalid_client"
        );
    }
}
