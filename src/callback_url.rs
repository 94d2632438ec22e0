use cookie::Cookie;

use crate::config::AuthOptions;

/// Post-authentication redirect target and the cookie that remembers it.
#[derive(Debug, Clone)]
pub struct CallbackUrl {
    pub url: String,
    /// Set only when `url` differs from the cookie already held by the browser.
    pub cookie: Option<Cookie<'static>>,
}

/// Resolves where to send the browser after sign-in or sign-out.
///
/// The `callbackUrl` parameter wins over the cookie; either one passes through
/// the `redirect` callback. With neither, the base URL is used.
#[must_use]
pub fn resolve_callback_url(
    options: &AuthOptions,
    param_value: Option<&str>,
    cookie_value: Option<&str>,
) -> CallbackUrl {
    let base_url = options.base_url();
    let url = match param_value.or(cookie_value) {
        Some(candidate) if !candidate.is_empty() => {
            options.callbacks.redirect(candidate, &base_url)
        }
        _ => base_url,
    };

    let cookie = (cookie_value != Some(url.as_str())).then(|| {
        options
            .cookies
            .build(&options.cookies.names.callback_url, url.clone(), None)
    });

    CallbackUrl { url, cookie }
}
