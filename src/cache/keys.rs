//! # 缓存键命名规范
//!
//! 所有写入键值存储的键都从这里生成，前缀与 TTL 集中定义。

use std::fmt;
use std::time::Duration;

/// PKCE verifier 有效期
pub const PKCE_TTL: Duration = Duration::from_secs(600);
/// 会话存储的滑动 TTL（30 天）
pub const SESSION_TTL: Duration = Duration::from_secs(2_592_000);
/// 跨进程刷新锁 TTL
pub const REFRESH_LOCK_TTL: Duration = Duration::from_secs(10);
/// 本地授权码有效期
pub const OAUTH_GRANT_TTL: Duration = Duration::from_secs(600);
/// 本地访问令牌有效期
pub const OAUTH_TOKEN_TTL: Duration = Duration::from_secs(3_600);

/// 缓存键类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey {
    /// PKCE verifier - `pkce:{state}`
    PkceVerifier { state: String },

    /// SSO 会话记录 - `workos_session:{token}`
    Session { token: String },

    /// 会话刷新锁 - `workos_session_refresh:{token}`
    SessionRefreshLock { token: String },

    /// 一次性授权码 - `oauth_grant:{code}`
    OAuthGrant { code: String },

    /// 访问令牌 - `oauth_token:{token}`
    OAuthToken { token: String },
}

impl CacheKey {
    /// 生成缓存键字符串
    #[must_use]
    pub fn build(&self) -> String {
        match self {
            Self::PkceVerifier { state } => format!("pkce:{state}"),
            Self::Session { token } => format!("workos_session:{token}"),
            Self::SessionRefreshLock { token } => format!("workos_session_refresh:{token}"),
            Self::OAuthGrant { code } => format!("oauth_grant:{code}"),
            Self::OAuthToken { token } => format!("oauth_token:{token}"),
        }
    }

    /// 该类键的默认 TTL
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        match self {
            Self::PkceVerifier { .. } => PKCE_TTL,
            Self::Session { .. } => SESSION_TTL,
            Self::SessionRefreshLock { .. } => REFRESH_LOCK_TTL,
            Self::OAuthGrant { .. } => OAUTH_GRANT_TTL,
            Self::OAuthToken { .. } => OAUTH_TOKEN_TTL,
        }
    }

    /// 获取缓存键的命名空间
    #[must_use]
    pub const fn namespace(&self) -> &'static str {
        match self {
            Self::PkceVerifier { .. } => "pkce",
            Self::Session { .. } => "workos_session",
            Self::SessionRefreshLock { .. } => "workos_session_refresh",
            Self::OAuthGrant { .. } => "oauth_grant",
            Self::OAuthToken { .. } => "oauth_token",
        }
    }

    /// 是否为一次性读取的键（读取即删除）
    #[must_use]
    pub const fn is_one_time(&self) -> bool {
        matches!(self, Self::PkceVerifier { .. } | Self::OAuthGrant { .. })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build())
    }
}

/// 缓存键构建器
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// 构建 PKCE verifier 缓存键
    #[must_use]
    pub fn pkce(state: &str) -> CacheKey {
        CacheKey::PkceVerifier {
            state: state.to_string(),
        }
    }

    /// 构建会话缓存键
    #[must_use]
    pub fn session(token: &str) -> CacheKey {
        CacheKey::Session {
            token: token.to_string(),
        }
    }

    /// 构建会话刷新锁缓存键
    #[must_use]
    pub fn session_refresh_lock(token: &str) -> CacheKey {
        CacheKey::SessionRefreshLock {
            token: token.to_string(),
        }
    }

    /// 构建授权码缓存键
    #[must_use]
    pub fn oauth_grant(code: &str) -> CacheKey {
        CacheKey::OAuthGrant {
            code: code.to_string(),
        }
    }

    /// 构建访问令牌缓存键
    #[must_use]
    pub fn oauth_token(token: &str) -> CacheKey {
        CacheKey::OAuthToken {
            token: token.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_build() {
        assert_eq!(CacheKeyBuilder::pkce("abc").build(), "pkce:abc");
        assert_eq!(
            CacheKeyBuilder::session("tok").build(),
            "workos_session:tok"
        );
        assert_eq!(
            CacheKeyBuilder::session_refresh_lock("tok").build(),
            "workos_session_refresh:tok"
        );
        assert_eq!(CacheKeyBuilder::oauth_grant("c1").build(), "oauth_grant:c1");
        assert_eq!(CacheKeyBuilder::oauth_token("t1").to_string(), "oauth_token:t1");
    }

    #[test]
    fn test_cache_key_ttls() {
        assert_eq!(CacheKeyBuilder::pkce("s").default_ttl().as_secs(), 600);
        assert_eq!(
            CacheKeyBuilder::session("t").default_ttl().as_secs(),
            2_592_000
        );
        assert_eq!(
            CacheKeyBuilder::session_refresh_lock("t").default_ttl().as_secs(),
            10
        );
    }

    #[test]
    fn test_one_time_keys() {
        assert!(CacheKeyBuilder::pkce("s").is_one_time());
        assert!(CacheKeyBuilder::oauth_grant("c").is_one_time());
        assert!(!CacheKeyBuilder::session("t").is_one_time());
    }
}
