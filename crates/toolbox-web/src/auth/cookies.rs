//! Session cookie formatting and parsing.

use std::time::Duration;

use axum::http::header::{self, HeaderMap, HeaderValue};
use toolbox_core::{IssuedToken, TokenKind};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

pub fn cookie_name(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Access => ACCESS_COOKIE,
        TokenKind::Refresh => REFRESH_COOKIE,
    }
}

fn format_cookie(name: &str, value: &str, max_age: u64, secure: bool) -> anyhow::Result<HeaderValue> {
    let mut cookie = format!("{name}={value}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).map_err(|e| anyhow::anyhow!("invalid cookie value for {name}: {e}"))
}

pub fn session_cookie(token: &IssuedToken, secure: bool) -> anyhow::Result<HeaderValue> {
    format_cookie(
        cookie_name(token.kind),
        &token.token,
        token.max_age.as_secs(),
        secure,
    )
}

pub fn expired_cookie(name: &str, secure: bool) -> anyhow::Result<HeaderValue> {
    format_cookie(name, "", Duration::ZERO.as_secs(), secure)
}

pub fn append_session_cookie(
    headers: &mut HeaderMap,
    token: &IssuedToken,
    secure: bool,
) -> anyhow::Result<()> {
    headers.append(header::SET_COOKIE, session_cookie(token, secure)?);
    Ok(())
}

pub fn append_expired_cookies(headers: &mut HeaderMap, secure: bool) -> anyhow::Result<()> {
    headers.append(header::SET_COOKIE, expired_cookie(ACCESS_COOKIE, secure)?);
    headers.append(header::SET_COOKIE, expired_cookie(REFRESH_COOKIE, secure)?);
    Ok(())
}

/// Finds a cookie by name across every `Cookie` header. Empty values count
/// as absent.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}
