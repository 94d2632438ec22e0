use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Rejection of the [`AuthSession`](super::AuthSession) extractor.
#[derive(Debug, thiserror::Error)]
pub enum AuthRejection {
    /// No session cookie.
    #[error("Not authenticated")]
    Unauthenticated,

    /// A session cookie was sent but is invalid or past its expiry.
    #[error("Session expired")]
    SessionExpired,

    /// Session lookup failed (storage error or timeout).
    #[error(transparent)]
    Internal(#[from] crate::error::Error),
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated | Self::SessionExpired => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
            Self::Internal(ref e) => {
                tracing::error!(error = %e, "Session lookup failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": e.code().to_string() })),
                )
                    .into_response()
            }
        }
    }
}
