//! OAuth 2.0 / OpenID Connect client side: authorization redirect, callback
//! verification, code exchange and ID token validation.

pub mod authorization;
pub mod callback;
pub(crate) mod client;
pub(crate) mod id_token;

pub use authorization::{AuthorizationRequest, authorization_url};
pub use callback::{CallbackParams, CallbackStage, OAuthOutcome};
