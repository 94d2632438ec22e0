use std::fmt;
use std::sync::Arc;

use cookie::Cookie;
use http::{HeaderValue, Method, StatusCode};
use serde_json::{Map, Value, json};

use crate::actions::{AuthAction, AuthRequest, AuthResponse};
use crate::callback_url::resolve_callback_url;
use crate::callbacks::{AuthEvent, SignInDecision};
use crate::checks;
use crate::config::AuthOptions;
use crate::cookies::RequestCookies;
use crate::csrf::{CsrfInput, CsrfToken, create_csrf_token, validate_csrf};
use crate::error::{Error, ErrorCode};
use crate::identity;
use crate::oauth::client::ProviderClient;
use crate::oauth::{CallbackParams, authorization_url, callback};
use crate::provider::{CredentialsProvider, OAuthProvider, Provider};
use crate::session::{self, SessionLookup};
use crate::types::{Account, User};

/// The sign-in broker. Cheap to clone; all clones share one configuration and
/// one outbound HTTP client.
#[derive(Clone)]
pub struct Auth {
    inner: Arc<Inner>,
}

struct Inner {
    options: AuthOptions,
    client: ProviderClient,
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

/// Request-scoped state shared by the action handlers.
struct Exchange<'a> {
    request: &'a AuthRequest,
    csrf: CsrfToken,
    /// Cookies collected along the way; sent with success and error responses.
    cookies: Vec<Cookie<'static>>,
}

impl Exchange<'_> {
    fn cookie(&self, name: &str) -> Option<&str> {
        self.request.cookies.get(name).map(String::as_str)
    }

    fn jar(&self) -> &RequestCookies {
        &self.request.cookies
    }
}

impl Auth {
    /// Validates `options` and builds the broker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for any invalid setting.
    pub fn new(options: AuthOptions) -> Result<Self, Error> {
        options.validate()?;
        let client = ProviderClient::new(options.http_timeout)?;
        tracing::info!(
            providers = options.providers.len(),
            strategy = ?options.session.strategy,
            base_path = %options.base_path,
            "Auth broker configured"
        );
        Ok(Self {
            inner: Arc::new(Inner { options, client }),
        })
    }

    #[must_use]
    pub fn options(&self) -> &AuthOptions {
        &self.inner.options
    }

    /// Reads the session for a protected route.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Adapter`] if storage fails.
    pub async fn get_session(&self, cookies: &RequestCookies) -> Result<SessionLookup, Error> {
        session::get_session(&self.inner.options, cookies).await
    }

    /// Runs one auth action. Never fails: errors become error redirects or
    /// JSON error bodies, and cookies collected before the failure are kept.
    pub async fn handle(&self, request: AuthRequest) -> AuthResponse {
        let options = &self.inner.options;
        let csrf = create_csrf_token(
            CsrfInput {
                cookie_value: request
                    .cookies
                    .get(&options.cookies.names.csrf_token)
                    .map(String::as_str),
                is_post: request.is_post(),
                body_value: request.body.get("csrfToken").map(String::as_str),
            },
            &options.secrets,
        );

        let mut exchange = Exchange {
            request: &request,
            cookies: Vec::new(),
            csrf,
        };
        if let Some(value) = exchange.csrf.cookie.clone() {
            exchange
                .cookies
                .push(options.cookies.build(&options.cookies.names.csrf_token, value, None));
        }

        let result = self.dispatch(&mut exchange).await;
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(action = %request.action, error = %e, "Auth action failed");
                self.error_redirect(&e)
            }
        };

        let mut cookies = exchange.cookies;
        cookies.extend(response.cookies);
        AuthResponse { cookies, ..response }
    }

    async fn dispatch(&self, exchange: &mut Exchange<'_>) -> Result<AuthResponse, Error> {
        let method = exchange.request.method.clone();
        match (exchange.request.action, method) {
            (AuthAction::Providers, Method::GET) => Ok(self.providers()),
            (AuthAction::Csrf, Method::GET) => Ok(AuthResponse::json(
                StatusCode::OK,
                json!({ "csrfToken": exchange.csrf.token }),
            )),
            (AuthAction::Session, Method::GET) => Ok(self.session(exchange).await),
            (AuthAction::SignIn, Method::GET) => Ok(self.sign_in_page(exchange)),
            (AuthAction::SignIn, Method::POST) => self.sign_in(exchange),
            (AuthAction::Callback, Method::GET | Method::POST) => self.callback(exchange).await,
            (AuthAction::SignOut, Method::GET) => Ok(self.sign_out_page(exchange)),
            (AuthAction::SignOut, Method::POST) => self.sign_out(exchange).await,
            (AuthAction::Error, Method::GET) => Ok(self.error_page(exchange.request)),
            (action, method) => Ok(method_not_allowed(action, &method)),
        }
    }

    fn require_csrf(&self, exchange: &Exchange<'_>) -> Result<(), Error> {
        if self.inner.options.skip_csrf_check {
            return Ok(());
        }
        validate_csrf(exchange.request.action, exchange.csrf.verified)
    }

    fn providers(&self) -> AuthResponse {
        let options = &self.inner.options;
        let providers: Map<String, Value> = options
            .providers
            .iter()
            .map(|provider| {
                let id = provider.id();
                (
                    id.to_owned(),
                    json!({
                        "id": id,
                        "name": provider.name(),
                        "type": provider.kind().as_str(),
                        "signinUrl": options.action_url(&format!("signin/{id}")),
                        "callbackUrl": options.provider_callback_url(id),
                    }),
                )
            })
            .collect();
        AuthResponse::json(StatusCode::OK, Value::Object(providers))
    }

    async fn session(&self, exchange: &mut Exchange<'_>) -> AuthResponse {
        let lookup = match session::get_session(&self.inner.options, exchange.jar()).await {
            Ok(lookup) => lookup,
            Err(e) => {
                tracing::error!(error = %e, "Session lookup failed");
                return AuthResponse::json(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": e.code().to_string() }),
                );
            }
        };
        exchange.cookies.extend(lookup.cookies);

        let body = match lookup.session.map(serde_json::to_value) {
            Some(Ok(session)) => session,
            Some(Err(e)) => {
                tracing::error!(error = %e, "Session could not be serialized");
                return AuthResponse::json(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": ErrorCode::Configuration.to_string() }),
                );
            }
            None => json!({}),
        };
        AuthResponse::json(StatusCode::OK, body)
    }

    /// Resolves `callbackUrl` and queues the cookie that remembers it.
    fn callback_url(&self, exchange: &mut Exchange<'_>, param: Option<&str>) -> String {
        let options = &self.inner.options;
        let resolved = resolve_callback_url(
            options,
            param,
            exchange.cookie(&options.cookies.names.callback_url),
        );
        exchange.cookies.extend(resolved.cookie);
        resolved.url
    }

    fn sign_in_page(&self, exchange: &mut Exchange<'_>) -> AuthResponse {
        let options = &self.inner.options;
        let request = exchange.request;
        let callback_url = self.callback_url(exchange, request.callback_url_param());
        if let Some(page) = &options.pages.sign_in {
            return AuthResponse::redirect(with_query(page, "callbackUrl", &callback_url));
        }

        let providers: Vec<Value> = options
            .providers
            .iter()
            .map(|p| json!({ "id": p.id(), "name": p.name(), "type": p.kind().as_str() }))
            .collect();
        AuthResponse::json(
            StatusCode::OK,
            json!({
                "providers": providers,
                "csrfToken": exchange.csrf.token,
                "callbackUrl": callback_url,
            }),
        )
    }

    fn sign_in(&self, exchange: &mut Exchange<'_>) -> Result<AuthResponse, Error> {
        self.require_csrf(exchange)?;
        let options = &self.inner.options;
        let request = exchange.request;
        let callback_url = self.callback_url(exchange, request.callback_url_param());
        let Some(provider_id) = request.provider_id.as_deref() else {
            return Ok(self.sign_in_page_redirect(&callback_url));
        };
        let provider = options.provider(provider_id)?;

        match provider {
            Provider::OAuth(provider) => {
                let extra: Vec<(String, String)> = request
                    .query
                    .iter()
                    .filter(|(key, _)| key.as_str() != "callbackUrl")
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                let authorization = authorization_url(provider, options, &callback_url, &extra);
                exchange.cookies.extend(authorization.cookies);
                tracing::info!(provider = %provider.id, "Redirecting to provider");
                Ok(AuthResponse::redirect(authorization.url.as_str()))
            }
            Provider::Credentials(_) => Ok(self.sign_in_page_redirect(&callback_url)),
        }
    }

    fn sign_in_page_redirect(&self, callback_url: &str) -> AuthResponse {
        let options = &self.inner.options;
        let page = options
            .pages
            .sign_in
            .clone()
            .unwrap_or_else(|| options.action_url("signin"));
        AuthResponse::redirect(with_query(&page, "callbackUrl", callback_url))
    }

    async fn callback(&self, exchange: &mut Exchange<'_>) -> Result<AuthResponse, Error> {
        let options = &self.inner.options;
        let request = exchange.request;
        let provider = options.provider(request.provider_id.as_deref().unwrap_or_default())?;
        match provider {
            Provider::OAuth(provider) => self.oauth_callback(exchange, provider).await,
            Provider::Credentials(_) if !request.is_post() => {
                Ok(method_not_allowed(request.action, &request.method))
            }
            Provider::Credentials(provider) => self.credentials_callback(exchange, provider).await,
        }
    }

    async fn oauth_callback(
        &self,
        exchange: &mut Exchange<'_>,
        provider: &OAuthProvider,
    ) -> Result<AuthResponse, Error> {
        let options = &self.inner.options;
        let request = exchange.request;
        // Each check value is usable once, whatever the outcome.
        let cleared = checks::clear(options, exchange.jar());
        exchange.cookies.extend(cleared);

        // `response_mode=form_post` providers send the parameters in the body.
        let params = if request.is_post() && !request.body.is_empty() {
            CallbackParams::from_query(&request.body)
        } else {
            CallbackParams::from_query(&request.query)
        };
        let outcome =
            callback::handle(&self.inner.client, provider, options, &params, exchange.jar())
                .await?;

        let candidate = User::from_profile(&outcome.profile);
        match options
            .callbacks
            .sign_in(&candidate, Some(&outcome.account), Some(&outcome.profile))
        {
            SignInDecision::Allow => {}
            SignInDecision::Deny => return Err(Error::AccessDenied),
            SignInDecision::Redirect(url) => {
                let target = options.callbacks.redirect(&url, &options.base_url());
                return Ok(AuthResponse::redirect(target));
            }
        }

        let current_user = session::current_user(options, exchange.jar()).await;
        let reconciled = identity::reconcile(
            options,
            provider,
            &outcome.profile,
            outcome.account,
            current_user.as_ref(),
        )
        .await?;

        let session_cookies = session::issue(
            options,
            &reconciled.user,
            Some(&reconciled.account),
            Some(&outcome.profile),
            reconciled.is_new_user,
            exchange.jar(),
        )
        .await?;
        exchange.cookies.extend(session_cookies);

        options.events.emit(&AuthEvent::SignIn {
            user: &reconciled.user,
            account: Some(&reconciled.account),
            is_new_user: reconciled.is_new_user,
        });
        tracing::info!(
            provider = %provider.id,
            user_id = %reconciled.user.id,
            is_new_user = reconciled.is_new_user,
            "Signed in"
        );

        let target = self.callback_url(exchange, outcome.callback_url.as_deref());
        Ok(AuthResponse::redirect(target))
    }

    async fn credentials_callback(
        &self,
        exchange: &mut Exchange<'_>,
        provider: &CredentialsProvider,
    ) -> Result<AuthResponse, Error> {
        self.require_csrf(exchange)?;
        let options = &self.inner.options;
        let request = exchange.request;

        let user = (provider.authorize)(&request.body).ok_or_else(|| {
            tracing::info!(provider = %provider.id, "Credentials rejected");
            Error::CredentialsSignin
        })?;
        let account = Account {
            user_id: Some(user.id.clone()),
            provider: provider.id.clone(),
            kind: "credentials".into(),
            provider_account_id: user.id.0.clone(),
            access_token: None,
            refresh_token: None,
            id_token: None,
            expires_at: None,
            token_type: None,
            scope: None,
        };

        match options.callbacks.sign_in(&user, Some(&account), None) {
            SignInDecision::Allow => {}
            SignInDecision::Deny => return Err(Error::AccessDenied),
            SignInDecision::Redirect(url) => {
                let target = options.callbacks.redirect(&url, &options.base_url());
                return Ok(AuthResponse::redirect(target));
            }
        }

        let session_cookies =
            session::issue(options, &user, Some(&account), None, false, exchange.jar()).await?;
        exchange.cookies.extend(session_cookies);
        options.events.emit(&AuthEvent::SignIn {
            user: &user,
            account: Some(&account),
            is_new_user: false,
        });
        tracing::info!(provider = %provider.id, user_id = %user.id, "Signed in");

        let target = self.callback_url(exchange, request.callback_url_param());
        Ok(AuthResponse::redirect(target))
    }

    fn sign_out_page(&self, exchange: &Exchange<'_>) -> AuthResponse {
        match &self.inner.options.pages.sign_out {
            Some(page) => AuthResponse::redirect(page.clone()),
            None => AuthResponse::json(
                StatusCode::OK,
                json!({ "csrfToken": exchange.csrf.token }),
            ),
        }
    }

    async fn sign_out(&self, exchange: &mut Exchange<'_>) -> Result<AuthResponse, Error> {
        self.require_csrf(exchange)?;
        let options = &self.inner.options;
        let outcome = session::sign_out(options, exchange.jar()).await;
        exchange.cookies.extend(outcome.cookies);
        if let Some(error) = outcome.error {
            return Err(error);
        }
        let request = exchange.request;
        let target = self.callback_url(exchange, request.callback_url_param());
        Ok(AuthResponse::redirect(target))
    }

    fn error_page(&self, request: &AuthRequest) -> AuthResponse {
        let code = request
            .query
            .get("error")
            .map_or("Default", String::as_str);
        if let Some(page) = &self.inner.options.pages.error {
            return AuthResponse::redirect(with_query(page, "error", code));
        }
        let status = match code {
            "AccessDenied" | "Verification" => StatusCode::FORBIDDEN,
            "Configuration" => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        };
        AuthResponse::json(status, json!({ "error": code }))
    }

    fn error_redirect(&self, error: &Error) -> AuthResponse {
        let page = self.inner.options.error_page();
        AuthResponse::redirect(with_query(&page, "error", &error.code().to_string()))
    }
}

fn with_query(url: &str, key: &str, value: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{key}={}", urlencoding::encode(value))
}

fn method_not_allowed(action: AuthAction, method: &Method) -> AuthResponse {
    tracing::debug!(%action, %method, "Method not allowed");
    let mut response = AuthResponse::json(
        StatusCode::METHOD_NOT_ALLOWED,
        json!({ "error": "MethodNotAllowed" }),
    );
    let allow = match action {
        AuthAction::SignIn | AuthAction::SignOut => "GET, POST",
        AuthAction::Callback => "POST",
        _ => "GET",
    };
    response
        .headers
        .insert(http::header::ALLOW, HeaderValue::from_static(allow));
    response
}
