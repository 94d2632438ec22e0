//! Cookie codec: signed values, cookie policy, and chunking of oversized values.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cookie::{Cookie, SameSite};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::{Duration, OffsetDateTime};

use crate::config::Secrets;
use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

/// Cookies sent by the browser, already percent-decoded, keyed by name.
pub type RequestCookies = HashMap<String, String>;

const ALLOWED_COOKIE_SIZE: usize = 4096;
const ESTIMATED_EMPTY_COOKIE_SIZE: usize = 160;

/// Largest value stored in a single cookie before it is split into numbered parts.
pub const CHUNK_SIZE: usize = ALLOWED_COOKIE_SIZE - ESTIMATED_EMPTY_COOKIE_SIZE;

fn mac(secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length.
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key of any size")
}

/// Signs `value` with the newest secret.
///
/// `sealed = BASE64URL(value) "." BASE64URL(HMAC-SHA256(secret, BASE64URL(value)))`
#[must_use]
pub fn seal(value: &str, secrets: &Secrets) -> String {
    let payload = URL_SAFE_NO_PAD.encode(value);
    let mut m = mac(secrets.current());
    m.update(payload.as_bytes());
    let tag = URL_SAFE_NO_PAD.encode(m.finalize().into_bytes());
    format!("{payload}.{tag}")
}

/// Verifies a value produced by [`seal`] against every configured secret.
///
/// # Errors
///
/// Returns [`Error::InvalidSignature`] if the format is wrong or no secret
/// produces a matching MAC.
pub fn open(sealed: &str, secrets: &Secrets) -> Result<String, Error> {
    let (payload, tag) = sealed.rsplit_once('.').ok_or(Error::InvalidSignature)?;
    let tag = URL_SAFE_NO_PAD
        .decode(tag)
        .map_err(|_| Error::InvalidSignature)?;

    let verified = secrets.iter().any(|secret| {
        let mut m = mac(secret);
        m.update(payload.as_bytes());
        m.verify_slice(&tag).is_ok()
    });
    if !verified {
        return Err(Error::InvalidSignature);
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| Error::InvalidSignature)?;
    String::from_utf8(bytes).map_err(|_| Error::InvalidSignature)
}

#[derive(Serialize, Deserialize)]
struct Expiring {
    value: String,
    exp: i64,
}

/// Seals `value` together with an absolute expiry `ttl` from now.
#[must_use]
pub fn seal_with_expiry(value: &str, secrets: &Secrets, ttl: Duration) -> String {
    let envelope = Expiring {
        value: value.to_owned(),
        exp: (OffsetDateTime::now_utc() + ttl).unix_timestamp(),
    };
    // A struct of a string and an integer always serializes.
    let json = serde_json::to_string(&envelope).unwrap_or_default();
    seal(&json, secrets)
}

/// Opens a value sealed by [`seal_with_expiry`]. Expired envelopes are invalid.
///
/// # Errors
///
/// Returns [`Error::InvalidSignature`] on a bad MAC, a malformed envelope, or expiry.
pub fn open_unexpired(sealed: &str, secrets: &Secrets) -> Result<String, Error> {
    let json = open(sealed, secrets)?;
    let envelope: Expiring = serde_json::from_str(&json).map_err(|_| Error::InvalidSignature)?;
    if envelope.exp <= OffsetDateTime::now_utc().unix_timestamp() {
        return Err(Error::InvalidSignature);
    }
    Ok(envelope.value)
}

/// Names of every cookie the broker reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieNames {
    pub session_token: String,
    pub csrf_token: String,
    pub callback_url: String,
    pub state: String,
    pub nonce: String,
    pub pkce_code_verifier: String,
}

impl CookieNames {
    /// Default names; secure deployments get the `__Secure-`/`__Host-` prefixes.
    #[must_use]
    pub fn defaults(secure: bool) -> Self {
        let prefix = if secure { "__Secure-" } else { "" };
        let host_prefix = if secure { "__Host-" } else { "" };
        Self {
            session_token: format!("{prefix}auth.session-token"),
            csrf_token: format!("{host_prefix}auth.csrf-token"),
            callback_url: format!("{prefix}auth.callback-url"),
            state: format!("{prefix}auth.state"),
            nonce: format!("{prefix}auth.nonce"),
            pkce_code_verifier: format!("{prefix}auth.pkce.code_verifier"),
        }
    }
}

/// Attributes applied to every cookie the broker emits.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub secure: bool,
    pub same_site: SameSite,
    pub domain: Option<String>,
    pub names: CookieNames,
}

impl CookiePolicy {
    #[must_use]
    pub fn new(secure: bool) -> Self {
        Self {
            secure,
            same_site: SameSite::Lax,
            domain: None,
            names: CookieNames::defaults(secure),
        }
    }

    /// Build an `HttpOnly` cookie; `max_age = None` makes it a browser-session cookie.
    pub(crate) fn build(
        &self,
        name: &str,
        value: String,
        max_age: Option<Duration>,
    ) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_owned(), value))
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .path("/");
        if let Some(max_age) = max_age {
            builder = builder
                .max_age(max_age)
                .expires(OffsetDateTime::now_utc() + max_age);
        }
        // `__Host-` cookies must not carry a Domain attribute.
        if let Some(domain) = &self.domain
            && !name.starts_with("__Host-")
        {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    /// Removal cookie for `name`.
    pub(crate) fn expired(&self, name: &str) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_owned(), ""))
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .path("/")
            .max_age(Duration::ZERO)
            .expires(OffsetDateTime::UNIX_EPOCH);
        if let Some(domain) = &self.domain
            && !name.starts_with("__Host-")
        {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    /// Write `value` under `name`, split into `name.0`, `name.1`, ... when it
    /// exceeds [`CHUNK_SIZE`]. Leftover parts of a previous value are expired.
    pub(crate) fn chunked(
        &self,
        name: &str,
        value: &str,
        max_age: Option<Duration>,
        existing: &RequestCookies,
    ) -> Vec<Cookie<'static>> {
        let mut out = Vec::new();

        if value.len() <= CHUNK_SIZE {
            out.push(self.build(name, value.to_owned(), max_age));
            out.extend(
                existing_chunks(name, existing)
                    .into_iter()
                    .map(|(index, _)| self.expired(&format!("{name}.{index}"))),
            );
            return out;
        }

        let parts = split_at_char_boundaries(value, CHUNK_SIZE);
        for (index, part) in parts.iter().enumerate() {
            out.push(self.build(&format!("{name}.{index}"), (*part).to_owned(), max_age));
        }
        if existing.contains_key(name) {
            out.push(self.expired(name));
        }
        out.extend(
            existing_chunks(name, existing)
                .into_iter()
                .filter(|(index, _)| *index >= parts.len())
                .map(|(index, _)| self.expired(&format!("{name}.{index}"))),
        );
        out
    }

    /// Expire `name` and every chunk of it present in the request.
    pub(crate) fn clear_chunked(
        &self,
        name: &str,
        existing: &RequestCookies,
    ) -> Vec<Cookie<'static>> {
        let mut out = vec![self.expired(name)];
        out.extend(
            existing
                .keys()
                .filter(|key| chunk_suffix(name, key).is_some())
                .map(|key| self.expired(key)),
        );
        out
    }
}

/// Reassembles a possibly chunked cookie value.
///
/// Returns `Ok(None)` if neither `name` nor any `name.N` part is present.
///
/// # Errors
///
/// Returns [`Error::MalformedCookie`] if a part is missing from the sequence.
pub fn reassemble(name: &str, cookies: &RequestCookies) -> Result<Option<String>, Error> {
    if let Some(value) = cookies.get(name) {
        return Ok(Some(value.clone()));
    }

    let chunks = existing_chunks(name, cookies);
    if chunks.is_empty() {
        return Ok(None);
    }
    for (expected, (index, _)) in chunks.iter().enumerate() {
        if *index != expected {
            return Err(Error::MalformedCookie(format!("{name}.{expected}")));
        }
    }
    Ok(Some(chunks.into_iter().map(|(_, value)| value).collect()))
}

/// Digits after `name.`, if `key` is a chunk of `name`.
fn chunk_suffix<'a>(name: &str, key: &'a str) -> Option<&'a str> {
    let digits = key.strip_prefix(name)?.strip_prefix('.')?;
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(digits)
}

/// `(index, value)` of every `name.N` cookie, sorted by index. Only canonical
/// indices count: `name.01` is not part 1.
fn existing_chunks<'a>(name: &str, cookies: &'a RequestCookies) -> Vec<(usize, &'a str)> {
    let mut chunks: Vec<(usize, &str)> = cookies
        .iter()
        .filter_map(|(key, value)| {
            let digits = chunk_suffix(name, key)?;
            if digits.len() > 1 && digits.starts_with('0') {
                return None;
            }
            Some((digits.parse().ok()?, value.as_str()))
        })
        .collect();
    chunks.sort_unstable_by_key(|(index, _)| *index);
    chunks
}

fn split_at_char_boundaries(value: &str, size: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let mut end = rest.len().min(size);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        parts.push(head);
        rest = tail;
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> Secrets {
        Secrets::new(["test-secret"]).unwrap()
    }

    fn flip_char(s: &str, at: usize) -> String {
        let mut bytes = s.as_bytes().to_vec();
        bytes[at] = if bytes[at] == b'A' { b'B' } else { b'A' };
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let sealed = seal("hello|world", &secrets());
        assert_eq!(open(&sealed, &secrets()).unwrap(), "hello|world");
    }

    #[test]
    fn test_open_rejects_wrong_secret() {
        let sealed = seal("value", &secrets());
        let other = Secrets::new(["other-secret"]).unwrap();
        assert!(matches!(open(&sealed, &other), Err(Error::InvalidSignature)));
    }

    #[test]
    fn test_open_accepts_rotated_secret() {
        let old = Secrets::new(["old-secret"]).unwrap();
        let sealed = seal("value", &old);
        let rotated = Secrets::new(["new-secret", "old-secret"]).unwrap();
        assert_eq!(open(&sealed, &rotated).unwrap(), "value");
    }

    #[test]
    fn test_open_rejects_tampered_payload_and_tag() {
        let sealed = seal("some value", &secrets());
        assert!(open(&flip_char(&sealed, 0), &secrets()).is_err());
        assert!(open(&flip_char(&sealed, sealed.len() - 3), &secrets()).is_err());
        assert!(open("no-separator", &secrets()).is_err());
    }

    #[test]
    fn test_expiring_envelope() {
        let sealed = seal_with_expiry("v", &secrets(), Duration::minutes(15));
        assert_eq!(open_unexpired(&sealed, &secrets()).unwrap(), "v");

        let stale = seal_with_expiry("v", &secrets(), Duration::seconds(-1));
        assert!(open_unexpired(&stale, &secrets()).is_err());
    }

    #[test]
    fn test_cookie_names_prefixes() {
        let secure = CookieNames::defaults(true);
        assert_eq!(secure.session_token, "__Secure-auth.session-token");
        assert_eq!(secure.csrf_token, "__Host-auth.csrf-token");
        let plain = CookieNames::defaults(false);
        assert_eq!(plain.state, "auth.state");
    }

    #[test]
    fn test_small_value_is_single_cookie() {
        let policy = CookiePolicy::new(false);
        let cookies = policy.chunked("s", "abc", Some(Duration::days(1)), &RequestCookies::new());
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name(), "s");
        assert_eq!(cookies[0].value(), "abc");
        assert_eq!(cookies[0].http_only(), Some(true));
        assert_eq!(cookies[0].path(), Some("/"));
    }

    #[test]
    fn test_chunk_and_reassemble() {
        let policy = CookiePolicy::new(false);
        let value = "x".repeat(CHUNK_SIZE * 2 + 10);
        let cookies = policy.chunked("s", &value, None, &RequestCookies::new());
        assert_eq!(cookies.len(), 3);
        assert_eq!(cookies[2].name(), "s.2");

        let jar: RequestCookies = cookies
            .iter()
            .map(|c| (c.name().to_owned(), c.value().to_owned()))
            .collect();
        assert_eq!(reassemble("s", &jar).unwrap().unwrap(), value);
    }

    #[test]
    fn test_reassemble_missing_part_fails() {
        let mut jar = RequestCookies::new();
        jar.insert("s.0".into(), "a".into());
        jar.insert("s.2".into(), "c".into());
        assert!(matches!(
            reassemble("s", &jar),
            Err(Error::MalformedCookie(name)) if name == "s.1"
        ));
        assert!(reassemble("absent", &jar).unwrap().is_none());
    }

    #[test]
    fn test_non_canonical_chunk_index_ignored() {
        let mut jar = RequestCookies::new();
        jar.insert("s.0".into(), "a".into());
        jar.insert("s.1".into(), "b".into());
        jar.insert("s.01".into(), "x".into());
        jar.insert("s.1x".into(), "y".into());
        assert_eq!(reassemble("s", &jar).unwrap().as_deref(), Some("ab"));

        let cleared = CookiePolicy::new(false).clear_chunked("s", &jar);
        let mut names: Vec<_> = cleared.iter().map(|c| c.name().to_owned()).collect();
        names.sort();
        assert_eq!(names, ["s", "s.0", "s.01", "s.1"]);
    }

    #[test]
    fn test_stale_chunks_are_expired() {
        let policy = CookiePolicy::new(false);
        let mut jar = RequestCookies::new();
        jar.insert("s.0".into(), "a".into());
        jar.insert("s.1".into(), "b".into());

        let cookies = policy.chunked("s", "short", None, &jar);
        let names: Vec<_> = cookies.iter().map(|c| c.name().to_owned()).collect();
        assert_eq!(names, ["s", "s.0", "s.1"]);
        assert_eq!(cookies[1].max_age(), Some(Duration::ZERO));
    }

    #[test]
    fn test_clear_chunked_expires_all_parts() {
        let policy = CookiePolicy::new(true);
        let mut jar = RequestCookies::new();
        jar.insert("s.0".into(), "a".into());
        let cookies = policy.clear_chunked("s", &jar);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.value().is_empty()));
    }

    #[test]
    fn test_host_prefixed_cookie_has_no_domain() {
        let mut policy = CookiePolicy::new(true);
        policy.domain = Some("example.com".into());
        let host = policy.build("__Host-auth.csrf-token", "v".into(), None);
        assert_eq!(host.domain(), None);
        let other = policy.build("__Secure-auth.state", "v".into(), None);
        assert_eq!(other.domain(), Some("example.com"));
    }
}
