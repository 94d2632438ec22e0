use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use serde_json::{Value, json};

use super::cookies;
use crate::actions::{Auth, AuthRequest, AuthResponse};

/// Create the authentication router.
///
/// Mounts `{base_path}/{action}` and `{base_path}/{action}/{provider}` for
/// every method; the dispatcher answers `405` where a method does not apply.
pub fn auth_routes(auth: Auth) -> Router {
    let base_path = auth.options().base_path.clone();
    Router::new()
        .route(&format!("{base_path}/{{action}}"), any(handle))
        .route(&format!("{base_path}/{{action}}/{{provider}}"), any(handle))
        .with_state(auth)
}

async fn handle(
    State(auth): State<Auth>,
    method: Method,
    uri: Uri,
    jar: CookieJar,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match AuthRequest::from_path(method, uri.path(), &auth.options().base_path) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, path = uri.path(), "Unknown auth route");
            return (StatusCode::NOT_FOUND, Json(json!({ "error": "NotFound" }))).into_response();
        }
    };

    let request = request
        .with_query(query)
        .with_body(parse_body(&headers, &body))
        .with_cookies(cookies::request_cookies(&jar));

    let response = auth.handle(request).await;
    into_response(jar, response)
}

/// Form or JSON body as flat string fields. Anything else yields no fields.
fn parse_body(headers: &HeaderMap, body: &Bytes) -> HashMap<String, String> {
    if body.is_empty() {
        return HashMap::new();
    }
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("application/json") {
        match serde_json::from_slice::<HashMap<String, Value>>(body) {
            Ok(fields) => fields
                .into_iter()
                .filter_map(|(key, value)| match value {
                    Value::String(s) => Some((key, s)),
                    Value::Number(_) | Value::Bool(_) => Some((key, value.to_string())),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed JSON body");
                HashMap::new()
            }
        }
    } else {
        url::form_urlencoded::parse(body).into_owned().collect()
    }
}

fn into_response(jar: CookieJar, response: AuthResponse) -> Response {
    let jar = cookies::apply(jar, response.cookies);

    let mut out = match response.body {
        Some(body) => (response.status, Json(body)).into_response(),
        None => response.status.into_response(),
    };
    if let Some(location) = response.redirect {
        match HeaderValue::from_str(&location) {
            Ok(value) => {
                out.headers_mut().insert(LOCATION, value);
            }
            Err(e) => {
                tracing::error!(error = %e, "Redirect target is not a valid header value");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }
    out.headers_mut().extend(response.headers);

    (jar, out).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;
    use crate::middleware::AuthSession;
    use crate::provider::CredentialsProvider;
    use crate::testing::test_options;
    use crate::types::{User, UserId};

    fn auth() -> Auth {
        let provider = CredentialsProvider::new("password", "Password", |fields| {
            (fields.get("password").map(String::as_str) == Some("hunter2")).then(|| User {
                id: UserId("u-1".into()),
                name: Some("Ada".into()),
                email: Some("ada@example.com".into()),
                email_verified: None,
                image: None,
            })
        });
        Auth::new(test_options().with_provider(provider)).unwrap()
    }

    fn app(auth: Auth) -> Router {
        let protected = Router::new()
            .route(
                "/me",
                get(|AuthSession(session): AuthSession| async move {
                    session.user.email.unwrap_or_default()
                }),
            )
            .with_state(auth.clone());
        auth_routes(auth).merge(protected)
    }

    /// `Cookie` request header built from the response's `Set-Cookie`s.
    fn cookie_header(response: &Response) -> String {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .filter(|pair| !pair.ends_with('='))
            .collect::<Vec<_>>()
            .join("; ")
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_csrf_route_sets_cookie() {
        let response = app(auth())
            .oneshot(Request::get("/api/auth/csrf").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(cookie_header(&response).starts_with("auth.csrf-token="));
        assert!(response.headers().contains_key(header::CACHE_CONTROL));
        let body = json_body(response).await;
        assert_eq!(body["csrfToken"].as_str().map(str::len), Some(64));
    }

    #[tokio::test]
    async fn test_unknown_action_is_not_found() {
        let response = app(auth())
            .oneshot(Request::get("/api/auth/bogus").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_without_csrf_redirects_to_error() {
        let response = app(auth())
            .oneshot(
                Request::post("/api/auth/signout")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("csrfToken=guess"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert_eq!(location, "http://localhost:3000/api/auth/error?error=MissingCSRF");
    }

    #[tokio::test]
    async fn test_protected_route_requires_session() {
        let response = app(auth())
            .oneshot(Request::get("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(auth())
            .oneshot(
                Request::get("/me")
                    .header(header::COOKIE, "auth.session-token=garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "Session expired");
    }

    #[tokio::test]
    async fn test_credentials_sign_in_then_protected_route() {
        let auth = auth();

        let response = app(auth.clone())
            .oneshot(Request::get("/api/auth/csrf").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let csrf_cookie = cookie_header(&response);
        let token = json_body(response).await["csrfToken"]
            .as_str()
            .unwrap()
            .to_owned();

        let response = app(auth.clone())
            .oneshot(
                Request::post("/api/auth/callback/password")
                    .header(header::COOKIE, &csrf_cookie)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({ "csrfToken": token, "password": "hunter2" }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "http://localhost:3000");
        let session_cookie = cookie_header(&response);
        assert!(session_cookie.contains("auth.session-token="));

        let response = app(auth)
            .oneshot(
                Request::get("/me")
                    .header(header::COOKIE, &session_cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ada@example.com");
    }

    #[test]
    fn test_parse_body_form_and_json() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let fields = parse_body(&headers, &Bytes::from_static(b"a=1&callbackUrl=%2Fx"));
        assert_eq!(fields["callbackUrl"], "/x");

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let fields = parse_body(&headers, &Bytes::from_static(br#"{"a":"b","n":2,"o":{}}"#));
        assert_eq!(fields["a"], "b");
        assert_eq!(fields["n"], "2");
        assert!(!fields.contains_key("o"));
    }
}
