//! Session cookie construction and `Cookie` header clean-up.

use axum::{
    extract::{Request, State},
    http::{header::COOKIE, HeaderValue},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use regex::Regex;
use std::sync::Arc;
use time::Duration;
use tracing::debug;

/// Create session cookie carrying only the opaque session id.
pub(super) fn session_cookie(
    name: &str,
    session_id: &str,
    max_age_seconds: i64,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name.to_string(), session_id.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::seconds(max_age_seconds))
        .build()
}

/// Create removal cookie for session.
pub(super) fn clear_session_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), ""))
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// Removes empty `<name>=` fragments from a `Cookie` header.
///
/// Some browsers send a stray empty session cookie next to the real one,
/// e.g. `tokenbroker_session=; tokenbroker_session=<value>`, which makes the
/// cookie extractor pick up the empty value.
#[derive(Clone)]
pub struct EmptyCookieFilter {
    pattern: Arc<Regex>,
}

impl EmptyCookieFilter {
    pub fn new(cookie_name: &str) -> anyhow::Result<Self> {
        let pattern = Regex::new(&format!(
            r"(^|;\s*){}=(?:;\s*|\s*$)",
            regex::escape(cookie_name)
        ))?;
        Ok(Self {
            pattern: Arc::new(pattern),
        })
    }

    pub fn clean(&self, header: &str) -> String {
        let mut cleaned = header.to_string();
        // Adjacent empty fragments share a separator, so one pass can miss one
        loop {
            let next = self.pattern.replace_all(&cleaned, "$1").into_owned();
            if next == cleaned {
                break;
            }
            cleaned = next;
        }
        cleaned
            .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
            .to_string()
    }
}

/// Middleware: rewrites every `Cookie` header through [`EmptyCookieFilter`]
/// before handlers extract the cookie jar.
pub async fn strip_empty_session_cookie(
    State(filter): State<EmptyCookieFilter>,
    mut request: Request,
    next: Next,
) -> Response {
    let headers = request.headers_mut();
    let original: Vec<String> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();

    if !original.is_empty() {
        headers.remove(COOKIE);
        for value in &original {
            let cleaned = filter.clean(value);
            if cleaned != *value {
                debug!("Removed empty session cookie fragment");
            }
            if cleaned.is_empty() {
                continue;
            }
            if let Ok(header_value) = HeaderValue::from_str(&cleaned) {
                headers.append(COOKIE, header_value);
            }
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> EmptyCookieFilter {
        EmptyCookieFilter::new("tokenbroker_session").unwrap()
    }

    #[test]
    fn test_leading_empty_fragment_removed() {
        assert_eq!(
            filter().clean("tokenbroker_session=; tokenbroker_session=abc"),
            "tokenbroker_session=abc"
        );
    }

    #[test]
    fn test_middle_and_trailing_fragments_removed() {
        assert_eq!(
            filter().clean("theme=dark; tokenbroker_session=;tokenbroker_session=abc; lang=en"),
            "theme=dark; tokenbroker_session=abc; lang=en"
        );
        assert_eq!(filter().clean("theme=dark; tokenbroker_session="), "theme=dark");
    }

    #[test]
    fn test_empty_fragment_between_other_cookies() {
        assert_eq!(filter().clean("a=1; tokenbroker_session=; b=2"), "a=1; b=2");
    }

    #[test]
    fn test_repeated_empty_fragments_removed() {
        assert_eq!(
            filter().clean("tokenbroker_session=; tokenbroker_session=; tokenbroker_session=v"),
            "tokenbroker_session=v"
        );
    }

    #[test]
    fn test_other_cookies_untouched() {
        assert_eq!(filter().clean("a=1; b=2"), "a=1; b=2");
        assert_eq!(
            filter().clean("tokenbroker_session=abc"),
            "tokenbroker_session=abc"
        );
        // A different cookie whose name ends with the session name
        assert_eq!(
            filter().clean("old_tokenbroker_session=; a=1"),
            "old_tokenbroker_session=; a=1"
        );
    }

    #[test]
    fn test_only_empty_fragment() {
        assert_eq!(filter().clean("tokenbroker_session="), "");
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("sid", "abc", 600, true);
        assert_eq!(cookie.name(), "sid");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(600)));
    }
}
