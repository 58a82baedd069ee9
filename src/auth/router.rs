//! # 认证路径分发
//!
//! 每个请求只看一次 `Authorization` 头，决定走 API Key 还是 OAuth。

use axum::http::Method;

use super::api_key::has_api_key_prefix;

/// 受保护的工具端点
pub const MCP_PATH: &str = "/mcp";

/// 认证路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRoute {
    /// 携带 API Key 的 Bearer 令牌
    ApiKey(String),
    /// 其余所有请求
    OAuth,
}

/// 取出 `Bearer` 令牌，方案名不区分大小写
#[must_use]
pub fn bearer_token(authorization: &str) -> Option<&str> {
    let (scheme, token) = authorization.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// 按方法、路径和 `Authorization` 头分类
#[must_use]
pub fn classify(method: &Method, path: &str, authorization: Option<&str>) -> AuthRoute {
    if method != Method::POST || path != MCP_PATH {
        return AuthRoute::OAuth;
    }
    match authorization.and_then(bearer_token) {
        Some(token) if has_api_key_prefix(token) => AuthRoute::ApiKey(token.to_string()),
        _ => AuthRoute::OAuth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "mcp_sk_0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_api_key_on_mcp_post() {
        assert_eq!(
            classify(&Method::POST, "/mcp", Some(&format!("Bearer {KEY}"))),
            AuthRoute::ApiKey(KEY.to_string())
        );
        assert_eq!(
            classify(&Method::POST, "/mcp", Some(&format!("bearer {KEY}"))),
            AuthRoute::ApiKey(KEY.to_string())
        );
    }

    #[test]
    fn test_everything_else_is_oauth() {
        let header = format!("Bearer {KEY}");
        assert_eq!(classify(&Method::GET, "/mcp", Some(&header)), AuthRoute::OAuth);
        assert_eq!(classify(&Method::POST, "/token", Some(&header)), AuthRoute::OAuth);
        assert_eq!(classify(&Method::POST, "/mcp", None), AuthRoute::OAuth);
        assert_eq!(
            classify(&Method::POST, "/mcp", Some("Bearer oauth-access-token")),
            AuthRoute::OAuth
        );
        assert_eq!(
            classify(&Method::POST, "/mcp", Some(&format!("Basic {KEY}"))),
            AuthRoute::OAuth
        );
    }

    #[test]
    fn test_malformed_prefixed_key_still_routes_to_api_key_path() {
        assert_eq!(
            classify(&Method::POST, "/mcp", Some("Bearer mcp_sk_short")),
            AuthRoute::ApiKey("mcp_sk_short".to_string())
        );
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer   "), None);
        assert_eq!(bearer_token("Token abc"), None);
    }
}
