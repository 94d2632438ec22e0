use axum_extra::extract::CookieJar;
use cookie::Cookie;

use crate::cookies::RequestCookies;

/// Flattens the request jar into the name → value map the core reads.
pub(super) fn request_cookies(jar: &CookieJar) -> RequestCookies {
    jar.iter()
        .map(|c| (c.name().to_owned(), c.value().to_owned()))
        .collect()
}

/// Queues `cookies` on the response jar. Removal cookies are added as-is so
/// they keep the path and domain they were issued with.
pub(super) fn apply(jar: CookieJar, cookies: Vec<Cookie<'static>>) -> CookieJar {
    cookies.into_iter().fold(jar, |jar, cookie| jar.add(cookie))
}

/// Whether the request carries the session cookie or any chunk of it.
pub(super) fn has_session_cookie(cookies: &RequestCookies, name: &str) -> bool {
    cookies.keys().any(|key| {
        key == name
            || key
                .strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|index| index.parse::<usize>().is_ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_session_cookie_matches_chunks_only() {
        let mut cookies = RequestCookies::new();
        cookies.insert("auth.session-token.1".into(), "x".into());
        assert!(has_session_cookie(&cookies, "auth.session-token"));

        let mut cookies = RequestCookies::new();
        cookies.insert("auth.session-token.backup".into(), "x".into());
        assert!(!has_session_cookie(&cookies, "auth.session-token"));
    }
}
