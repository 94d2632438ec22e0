//! Axum boundary for the sign-in broker.
//!
//! Mounts the action dispatcher as a [`Router`](axum::Router) and offers an
//! extractor for handlers that need the signed-in user.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use authbroker::middleware::{AuthSession, auth_routes};
//! use authbroker::{Auth, AuthOptions, providers};
//!
//! // 1. Configure from environment and register providers
//! let options = AuthOptions::from_env()?
//!     .with_provider(providers::github(client_id, client_secret));
//! let auth = Auth::new(options)?;
//!
//! // 2. Mount auth routes next to the app's own routes
//! let app = axum::Router::new()
//!     .route("/me", get(|AuthSession(session): AuthSession| async move { Json(session) }))
//!     .with_state(auth.clone())
//!     .merge(auth_routes(auth));
//! ```

mod cookies;
mod error;
mod extractor;
mod routes;

pub use error::AuthRejection;
pub use extractor::{AuthSession, resolve_session};
pub use routes::auth_routes;
