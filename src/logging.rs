//! # 日志配置模块
//!
//! 初始化 tracing 订阅器，并提供带统一字段（request_id / stage / component / operation）
//! 的结构化日志宏。订阅器是进程级配置，各组件只通过 `tracing` 宏输出，不持有日志对象。

use std::env;
use std::fmt;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 请求处理所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStage {
    Startup,
    Shutdown,
    Configuration,
    Authentication,
    Authorization,
    Callback,
    Session,
    Cache,
    Database,
    Request,
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Configuration => "configuration",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Callback => "callback",
            Self::Session => "session",
            Self::Cache => "cache",
            Self::Database => "database",
            Self::Request => "request",
        };
        f.write_str(name)
    }
}

/// 输出日志的组件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogComponent {
    Main,
    Config,
    Cache,
    Database,
    Pkce,
    Session,
    ApiKey,
    OAuth,
    IdentityProvider,
    UserDirectory,
    Router,
    Server,
}

impl fmt::Display for LogComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Main => "main",
            Self::Config => "config",
            Self::Cache => "cache",
            Self::Database => "database",
            Self::Pkce => "pkce",
            Self::Session => "session",
            Self::ApiKey => "api_key",
            Self::OAuth => "oauth",
            Self::IdentityProvider => "identity_provider",
            Self::UserDirectory => "user_directory",
            Self::Router => "router",
            Self::Server => "server",
        };
        f.write_str(name)
    }
}

/// INFO 级结构化日志
#[macro_export]
macro_rules! linfo {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($fields:tt)+)?) => {
        ::tracing::info!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)+ ,)?
            "{}",
            $message
        )
    };
}

/// DEBUG 级结构化日志
#[macro_export]
macro_rules! ldebug {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($fields:tt)+)?) => {
        ::tracing::debug!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)+ ,)?
            "{}",
            $message
        )
    };
}

/// WARN 级结构化日志
#[macro_export]
macro_rules! lwarn {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($fields:tt)+)?) => {
        ::tracing::warn!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)+ ,)?
            "{}",
            $message
        )
    };
}

/// ERROR 级结构化日志
#[macro_export]
macro_rules! lerror {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($fields:tt)+)?) => {
        ::tracing::error!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)+ ,)?
            "{}",
            $message
        )
    };
}

/// 默认过滤规则：关闭 SQL 明细日志
fn default_filter(level: &str) -> String {
    format!("{level},mcp_sso_auth=debug,sqlx::query=off,sea_orm::query=warn,sqlx=warn")
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先；否则使用 `log_level`（缺省 info）加默认过滤规则。重复调用是安全的。
pub fn init_logging(log_level: Option<&str>) {
    let level = log_level.unwrap_or("info");
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| default_filter(level));

    let result = tracing_subscriber::registry()
        .with(EnvFilter::try_new(&log_filter).unwrap_or_else(|_| EnvFilter::new(default_filter("info"))))
        .with(
            tracing_fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();

    if result.is_ok() {
        tracing::info!(filter = %log_filter, "日志系统初始化完成");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_and_component_names() {
        assert_eq!(LogStage::Authentication.to_string(), "authentication");
        assert_eq!(LogComponent::ApiKey.to_string(), "api_key");
        assert_eq!(LogComponent::IdentityProvider.to_string(), "identity_provider");
    }

    #[test]
    fn test_default_filter_silences_sql() {
        let filter = default_filter("warn");
        assert!(filter.starts_with("warn,"));
        assert!(filter.contains("sqlx::query=off"));
    }

    #[test]
    fn test_macros_expand() {
        init_logging(Some("debug"));
        let prefix = "mcp_sk_0123456789";
        linfo!("req-1", LogStage::Authentication, LogComponent::ApiKey, "validate", "ok");
        lwarn!(
            "req-1",
            LogStage::Authentication,
            LogComponent::ApiKey,
            "validate",
            &format!("拒绝: {prefix}"),
            key_prefix = %prefix
        );
    }
}
