//! # 应用配置结构定义

use serde::{Deserialize, Serialize};

use crate::auth::api_key::MAX_EXPIRES_IN_DAYS;

/// 应用主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP 服务配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 数据库配置
    #[serde(default)]
    pub database: super::DatabaseConfig,
    /// 缓存（键值存储）配置
    #[serde(default)]
    pub cache: CacheConfig,
    /// 身份提供商配置
    #[serde(default)]
    pub workos: WorkOsConfig,
    /// SSO 会话配置
    #[serde(default)]
    pub session: SessionConfig,
    /// 本地 OAuth 授权服务配置
    #[serde(default)]
    pub oauth: OAuthConfig,
    /// API Key 配置
    #[serde(default)]
    pub api_keys: ApiKeyConfig,
}

/// HTTP 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// 对外可见的基础 URL，用于拼接回调地址和 `return_to`
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            public_url: "http://localhost:8787".to_string(),
        }
    }
}

impl ServerConfig {
    /// 监听地址字符串
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 本服务的授权回调地址
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}/callback", self.public_url.trim_end_matches('/'))
    }
}

/// 缓存类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// 内存缓存（单节点、开发和测试）
    #[default]
    Memory,
    /// Redis缓存
    Redis,
}

/// 缓存配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 缓存类型
    #[serde(default)]
    pub cache_type: CacheType,
    /// Redis 缓存配置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis连接URL
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
        }
    }
}

/// WorkOS 身份提供商配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOsConfig {
    /// API 基础地址
    pub api_base_url: String,
    /// 客户端 ID
    pub client_id: String,
    /// API 密钥（通常通过 `WORKOS_API_KEY` 注入）
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// 集中式登录入口；配置后未登录请求会跳转到这里
    #[serde(default)]
    pub central_login_url: Option<String>,
    /// 注册页面地址
    pub registration_url: String,
    /// 会话 cookie 的 Domain 属性（根域名）
    #[serde(default)]
    pub cookie_domain: Option<String>,
}

impl Default for WorkOsConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.workos.com".to_string(),
            client_id: String::new(),
            api_key: String::new(),
            central_login_url: None,
            registration_url: "http://localhost:8787/register".to_string(),
            cookie_domain: None,
        }
    }
}

/// SSO 会话配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 会话存储的滑动 TTL（秒）
    pub ttl_seconds: u64,
    /// 跨进程刷新锁 TTL（秒）
    pub refresh_lock_ttl_seconds: u64,
    /// 未抢到刷新锁时等待其他节点完成刷新的时长（毫秒）
    pub refresh_wait_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 2_592_000,
            refresh_lock_ttl_seconds: 10,
            refresh_wait_ms: 1_500,
        }
    }
}

/// 本地 OAuth 授权服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// 授权码有效期（秒）
    pub grant_ttl_seconds: u64,
    /// 访问令牌有效期（秒）
    pub access_token_ttl_seconds: u64,
    /// 已注册的客户端；未注册的 `client_id` 一律拒绝
    #[serde(default)]
    pub clients: Vec<OAuthClientConfig>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            grant_ttl_seconds: 600,
            access_token_ttl_seconds: 3_600,
            clients: Vec::new(),
        }
    }
}

/// 已注册的 OAuth 客户端
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    /// 允许的回调地址，按完整 URL 比较（回环地址忽略端口）
    pub redirect_uris: Vec<String>,
}

impl OAuthClientConfig {
    #[must_use]
    pub fn new(client_id: &str, redirect_uris: &[&str]) -> Self {
        Self {
            client_id: client_id.to_string(),
            redirect_uris: redirect_uris.iter().map(ToString::to_string).collect(),
        }
    }
}

/// API Key 配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// 未显式指定时的默认有效天数；为空表示永不过期
    #[serde(default)]
    pub default_expires_in_days: Option<u32>,
}

impl AppConfig {
    /// 是否启用集中式登录
    #[must_use]
    pub fn uses_central_login(&self) -> bool {
        self.workos
            .central_login_url
            .as_deref()
            .is_some_and(|url| !url.is_empty())
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be greater than 0".to_string());
        }
        url::Url::parse(&self.server.public_url)
            .map_err(|e| format!("server.public_url is not a valid URL: {e}"))?;

        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        match self.cache.cache_type {
            CacheType::Memory => {
                if self.cache.redis.is_some() {
                    return Err("cache.redis 配置仅在 cache_type = \"redis\" 时可用".to_string());
                }
            }
            CacheType::Redis => {
                let redis = self
                    .cache
                    .redis
                    .as_ref()
                    .ok_or_else(|| "Redis cache configuration must be provided".to_string())?;

                if redis.url.is_empty() {
                    return Err("Redis URL cannot be empty".to_string());
                }
            }
        }

        if self.workos.client_id.is_empty() {
            return Err("workos.client_id cannot be empty".to_string());
        }
        if self.workos.api_key.is_empty() {
            return Err("workos.api_key cannot be empty (set WORKOS_API_KEY)".to_string());
        }
        if self.session.ttl_seconds == 0 || self.session.refresh_lock_ttl_seconds == 0 {
            return Err("session TTLs must be greater than 0".to_string());
        }
        if self.oauth.grant_ttl_seconds == 0 || self.oauth.access_token_ttl_seconds == 0 {
            return Err("oauth TTLs must be greater than 0".to_string());
        }
        let mut client_ids = std::collections::HashSet::new();
        for client in &self.oauth.clients {
            if client.client_id.is_empty() {
                return Err("oauth.clients[].client_id cannot be empty".to_string());
            }
            if !client_ids.insert(client.client_id.as_str()) {
                return Err(format!("duplicate oauth client: {}", client.client_id));
            }
            if client.redirect_uris.is_empty() {
                return Err(format!(
                    "oauth client {} needs at least one redirect_uri",
                    client.client_id
                ));
            }
            for uri in &client.redirect_uris {
                let parsed = url::Url::parse(uri)
                    .map_err(|e| format!("oauth client {} redirect_uri {uri}: {e}", client.client_id))?;
                if parsed.fragment().is_some() {
                    return Err(format!("redirect_uri must not carry a fragment: {uri}"));
                }
            }
        }
        if let Some(days) = self.api_keys.default_expires_in_days
            && !(1..=MAX_EXPIRES_IN_DAYS).contains(&days)
        {
            return Err(format!(
                "api_keys.default_expires_in_days must be 1-{MAX_EXPIRES_IN_DAYS}"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.workos.client_id = "client_123".to_string();
        config.workos.api_key = "sk_test".to_string();
        config
    }

    #[test]
    fn test_defaults_validate_once_credentials_present() {
        assert!(AppConfig::default().validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_redis_requires_section() {
        let mut config = valid_config();
        config.cache.cache_type = CacheType::Redis;
        assert!(config.validate().is_err());

        config.cache.redis = Some(RedisConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_callback_url_trims_slash() {
        let server = ServerConfig {
            public_url: "https://mcp.example.com/".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(server.callback_url(), "https://mcp.example.com/callback");
    }

    #[test]
    fn test_oauth_clients_validated() {
        let mut config = valid_config();
        config.oauth.clients = vec![OAuthClientConfig::new(
            "client-a",
            &["https://app.example/cb"],
        )];
        assert!(config.validate().is_ok());

        config.oauth.clients.push(OAuthClientConfig::new("client-a", &["https://b.example/cb"]));
        assert!(config.validate().is_err());

        config.oauth.clients = vec![OAuthClientConfig::new("client-b", &[])];
        assert!(config.validate().is_err());

        config.oauth.clients = vec![OAuthClientConfig::new("client-b", &["not a url"])];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_key_expiry_bounded() {
        let mut config = valid_config();
        config.api_keys.default_expires_in_days = Some(365);
        assert!(config.validate().is_ok());
        config.api_keys.default_expires_in_days = Some(u32::MAX);
        assert!(config.validate().is_err());
        config.api_keys.default_expires_in_days = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_central_login_empty_string_disabled() {
        let mut config = valid_config();
        config.workos.central_login_url = Some(String::new());
        assert!(!config.uses_central_login());
        config.workos.central_login_url = Some("https://login.example.com/login".to_string());
        assert!(config.uses_central_login());
    }
}
