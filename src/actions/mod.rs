//! Framework-independent request/response model and the action dispatcher.

mod dispatch;

use std::collections::HashMap;
use std::str::FromStr;

use cookie::Cookie;
use derive_more::Display;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::Value;

use crate::cookies::RequestCookies;
use crate::error::Error;

pub use dispatch::Auth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum AuthAction {
    #[display("providers")]
    Providers,
    #[display("csrf")]
    Csrf,
    #[display("session")]
    Session,
    #[display("signin")]
    SignIn,
    #[display("callback")]
    Callback,
    #[display("signout")]
    SignOut,
    #[display("error")]
    Error,
}

impl FromStr for AuthAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "providers" => Ok(Self::Providers),
            "csrf" => Ok(Self::Csrf),
            "session" => Ok(Self::Session),
            "signin" => Ok(Self::SignIn),
            "callback" => Ok(Self::Callback),
            "signout" => Ok(Self::SignOut),
            "error" => Ok(Self::Error),
            other => Err(Error::UnknownAction(other.to_owned())),
        }
    }
}

/// Inbound request, already parsed by the host framework.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub method: Method,
    pub action: AuthAction,
    pub provider_id: Option<String>,
    pub query: HashMap<String, String>,
    /// Form fields of a POST body.
    pub body: HashMap<String, String>,
    pub cookies: RequestCookies,
}

impl AuthRequest {
    #[must_use]
    pub fn new(method: Method, action: AuthAction) -> Self {
        Self {
            method,
            action,
            provider_id: None,
            query: HashMap::new(),
            body: HashMap::new(),
            cookies: RequestCookies::new(),
        }
    }

    /// Parses `{base_path}/{action}[/{provider}]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownAction`] if the path is outside `base_path` or
    /// names no known action.
    pub fn from_path(method: Method, path: &str, base_path: &str) -> Result<Self, Error> {
        let rest = path
            .strip_prefix(base_path)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| Error::UnknownAction(path.to_owned()))?;

        let mut segments = rest.split('/').filter(|s| !s.is_empty());
        let action: AuthAction = segments
            .next()
            .ok_or_else(|| Error::UnknownAction(path.to_owned()))?
            .parse()?;
        let provider_id = segments.next().map(str::to_owned);
        if segments.next().is_some() {
            return Err(Error::UnknownAction(path.to_owned()));
        }

        let mut request = Self::new(method, action);
        request.provider_id = provider_id;
        Ok(request)
    }

    #[must_use]
    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: HashMap<String, String>) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn with_cookies(mut self, cookies: RequestCookies) -> Self {
        self.cookies = cookies;
        self
    }

    pub(crate) fn is_post(&self) -> bool {
        self.method == Method::POST
    }

    /// `callbackUrl` from the query, else from the body.
    pub(crate) fn callback_url_param(&self) -> Option<&str> {
        self.query
            .get("callbackUrl")
            .or_else(|| self.body.get("callbackUrl"))
            .map(String::as_str)
    }
}

/// Uniform response; the host framework turns it into its own response type.
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub status: StatusCode,
    /// `Location` of a redirect.
    pub redirect: Option<String>,
    /// Cookies to set or expire, in order.
    pub cookies: Vec<Cookie<'static>>,
    pub headers: HeaderMap,
    /// JSON body.
    pub body: Option<Value>,
}

impl AuthResponse {
    #[must_use]
    pub fn json(status: StatusCode, body: Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CACHE_CONTROL,
            HeaderValue::from_static("private, no-cache, no-store"),
        );
        Self {
            status,
            redirect: None,
            cookies: Vec::new(),
            headers,
            body: Some(body),
        }
    }

    #[must_use]
    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FOUND,
            redirect: Some(location.into()),
            cookies: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_cookies(mut self, cookies: impl IntoIterator<Item = Cookie<'static>>) -> Self {
        self.cookies.extend(cookies);
        self
    }

    /// The cookie named `name` set by this response, if any.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&Cookie<'static>> {
        self.cookies.iter().rev().find(|c| c.name() == name)
    }
}
