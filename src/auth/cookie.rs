//! Session cookie parsing and `Set-Cookie` values.

use axum::http::{header, HeaderMap};

/// Cookie carrying the session token.
pub const SESSION_COOKIE_NAME: &str = "jwt";

/// Placeholder written on logout; never verifies as a token.
pub const LOGGED_OUT_VALUE: &str = "loggedout";

const LOGGED_OUT_MAX_AGE_SECS: i64 = 10;

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

pub fn session_cookie(token: &str, ttl_days: i64, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
        SESSION_COOKIE_NAME,
        token,
        ttl_days * 24 * 60 * 60,
        secure
    )
}

pub fn logout_cookie() -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE_NAME, LOGGED_OUT_VALUE, LOGGED_OUT_MAX_AGE_SECS
    )
}
