//! Browser session cookie.
//!
//! The IdP returns the user with a cross-site POST to the ACS, so with
//! secure cookies enabled the cookie is `SameSite=None; Secure`. Without
//! them (local development over plain HTTP) it falls back to `SameSite=Lax`.

use crate::services::SessionCookie;
use axum::http::{
    header::{COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use uuid::Uuid;

/// Cookie name for SPID browser sessions.
pub const SESSION_COOKIE_NAME: &str = "spid_session";

fn attributes(secure: bool) -> &'static str {
    if secure {
        "HttpOnly; Secure; SameSite=None; Path=/"
    } else {
        "HttpOnly; SameSite=Lax; Path=/"
    }
}

/// Cookie header value carrying `session_id`.
#[must_use]
pub fn create_session_cookie(session_id: Uuid, secure: bool, max_age_seconds: u64) -> String {
    format!(
        "{SESSION_COOKIE_NAME}={session_id}; {}; Max-Age={max_age_seconds}",
        attributes(secure)
    )
}

/// Cookie header value that expires the session cookie.
#[must_use]
pub fn clear_session_cookie(secure: bool) -> String {
    format!("{SESSION_COOKIE_NAME}=; {}; Max-Age=0", attributes(secure))
}

/// Extract the session ID from request cookies.
pub fn extract_session_cookie(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|part| {
            part.trim()
                .strip_prefix(SESSION_COOKIE_NAME)
                .and_then(|rest| rest.strip_prefix('='))
                .and_then(|value| Uuid::parse_str(value.trim()).ok())
        })
}

/// Apply a [`SessionCookie`] decision to response headers.
pub fn apply_session_cookie(
    headers: &mut HeaderMap,
    cookie: SessionCookie,
    secure: bool,
    max_age_seconds: u64,
) {
    let value = match cookie {
        SessionCookie::Keep => return,
        SessionCookie::Set(id) => create_session_cookie(id, secure, max_age_seconds),
        SessionCookie::Clear => clear_session_cookie(secure),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(SET_COOKIE, value);
    }
}
