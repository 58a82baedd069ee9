//! # SSO 会话 Cookie
//!
//! Cookie 名固定为 `workos_session`，同一根域名下的各个服务共享。

use axum::http::HeaderMap;
use axum::http::header::COOKIE;

/// 会话 Cookie 名
pub const SESSION_COOKIE_NAME: &str = "workos_session";

/// Cookie 有效期（秒），与会话存储 TTL 一致
pub const SESSION_COOKIE_MAX_AGE: u64 = 2_592_000;

/// 构建 `Set-Cookie` 值
#[must_use]
pub fn build_session_cookie(token: &str, domain: Option<&str>) -> String {
    cookie_with_max_age(token, SESSION_COOKIE_MAX_AGE, domain)
}

/// 构建清除会话的 `Set-Cookie` 值
#[must_use]
pub fn clear_session_cookie(domain: Option<&str>) -> String {
    cookie_with_max_age("", 0, domain)
}

fn cookie_with_max_age(value: &str, max_age: u64, domain: Option<&str>) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={value}; HttpOnly; Secure; SameSite=Lax; Max-Age={max_age}"
    );
    if let Some(domain) = domain.filter(|d| !d.is_empty()) {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    cookie.push_str("; Path=/");
    cookie
}

/// 从请求头中读取会话令牌
#[must_use]
pub fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(parse_session_cookie)
}

/// 从单个 `Cookie` 头中解析会话令牌；空值视为不存在
#[must_use]
pub fn parse_session_cookie(header: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
