//! # 配置管理模块
//!
//! 从 TOML 文件加载配置，再用环境变量覆盖敏感项，最后做有效性校验。

mod app_config;
mod database;

pub use app_config::{
    ApiKeyConfig, AppConfig, CacheConfig, CacheType, OAuthClientConfig, OAuthConfig, RedisConfig,
    ServerConfig, SessionConfig, WorkOsConfig,
};
pub use database::DatabaseConfig;

use crate::error::{GatewayError, Result};
use crate::{
    ensure_config, linfo,
    logging::{LogComponent, LogStage},
};
use std::env;
use std::path::{Path, PathBuf};

/// 显式指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "MCP_AUTH_CONFIG_PATH";

/// 解析配置文件路径：`MCP_AUTH_CONFIG_PATH` 优先，否则 `config/config.{RUST_ENV}.toml`
#[must_use]
pub fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
    PathBuf::from(format!("config/config.{env}.toml"))
}

/// 加载配置文件
pub fn load_config() -> Result<AppConfig> {
    load_config_from(&config_file_path())
}

/// 从指定路径加载配置
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    ensure_config!(path.exists(), "配置文件不存在: {}", path.display());

    let content = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::config_with_source(format!("读取配置文件失败: {}", path.display()), e)
    })?;

    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config, |name| env::var(name).ok());
    config.validate().map_err(GatewayError::config)?;

    linfo!(
        "system",
        LogStage::Configuration,
        LogComponent::Config,
        "config_loaded",
        &format!("配置加载完成: {}", path.display()),
        cache_type = ?config.cache.cache_type,
        central_login = config.uses_central_login()
    );

    Ok(config)
}

/// 解析 TOML 配置内容
pub fn parse_config(content: &str) -> Result<AppConfig> {
    Ok(toml::from_str(content)?)
}

/// 用环境变量覆盖敏感或部署相关的配置项
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(api_key) = lookup("WORKOS_API_KEY") {
        config.workos.api_key = api_key;
    }
    if let Some(client_id) = lookup("WORKOS_CLIENT_ID") {
        config.workos.client_id = client_id;
    }
    if let Some(url) = lookup("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(url) = lookup("REDIS_URL") {
        config.cache.cache_type = CacheType::Redis;
        config.cache.redis = Some(RedisConfig { url });
    }
    if let Some(url) = lookup("CENTRAL_LOGIN_URL") {
        config.workos.central_login_url = Some(url);
    }
}
