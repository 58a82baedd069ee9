//! # 错误类型定义

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use super::{AuthError, ErrorCategory};
use crate::auth::pages;
use crate::{ldebug, lerror};
use crate::logging::{LogComponent, LogStage};

/// 应用主要错误类型
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 配置相关错误
    #[error("配置错误: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 数据库相关错误
    #[error("数据库错误: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 缓存（键值存储）相关错误
    #[error("缓存错误: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 网络通信错误（身份提供商等上游）
    #[error("网络错误: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 序列化/反序列化错误
    #[error("序列化错误: {message}")]
    Serialization {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    /// 系统内部错误
    #[error("内部错误: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 服务器初始化错误
    #[error("服务器初始化错误: {message}")]
    ServerInit {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 认证和授权错误
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// 附加上下文的错误
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<GatewayError>,
    },
}

impl GatewayError {
    /// 将错误转换为HTTP状态码和错误代码
    #[must_use]
    pub fn to_http_response_parts(&self) -> (StatusCode, &str) {
        match self {
            Self::Config { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Self::Database { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            Self::Cache { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CACHE_ERROR"),
            Self::Network { .. } => (StatusCode::BAD_GATEWAY, "NETWORK_ERROR"),
            Self::Serialization { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            Self::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            Self::ServerInit { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "SERVER_INIT_ERROR"),
            Self::Auth(err) => (err.status_code(), err.error_code()),
            Self::Context { source, .. } => source.to_http_response_parts(),
        }
    }

    /// 错误归类（客户端 / 服务端）
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        if self.to_http_response_parts().0.is_client_error() {
            ErrorCategory::Client
        } else {
            ErrorCategory::Server
        }
    }

    /// 剥离上下文后的认证错误
    #[must_use]
    pub fn as_auth(&self) -> Option<&AuthError> {
        match self {
            Self::Auth(err) => Some(err),
            Self::Context { source, .. } => source.as_auth(),
            _ => None,
        }
    }

    /// 创建配置错误
    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的配置错误
    pub fn config_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建数据库错误
    pub fn database<T: Into<String>>(message: T) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的数据库错误
    pub fn database_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Database {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建缓存错误
    pub fn cache<T: Into<String>>(message: T) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的缓存错误
    pub fn cache_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Cache {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建网络错误
    pub fn network<T: Into<String>>(message: T) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的网络错误
    pub fn network_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建带来源的序列化错误
    pub fn serialization<T: Into<String>, E: Into<anyhow::Error>>(message: T, source: E) -> Self {
        Self::Serialization {
            message: message.into(),
            source: source.into(),
        }
    }

    /// 创建内部错误
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的内部错误
    pub fn internal_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建服务器初始化错误
    pub fn server_init<T: Into<String>>(message: T) -> Self {
        Self::ServerInit {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的服务器初始化错误
    pub fn server_init_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::ServerInit {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl From<sea_orm::DbErr> for GatewayError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::database_with_source("数据库操作失败", err)
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        Self::cache_with_source("Redis 操作失败", err)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("JSON 处理失败", err)
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_with_source("TOML 配置解析失败", err)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::network_with_source("HTTP 请求失败", err)
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::internal_with_source("IO 操作失败", err)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = self.to_http_response_parts();
        if self.category() == ErrorCategory::Client {
            ldebug!(
                "system",
                LogStage::Request,
                LogComponent::Server,
                "request_rejected",
                "请求被拒绝",
                error_code = code
            );
        }
        if let Some(auth_error) = self.as_auth() {
            return auth_error_response(auth_error);
        }

        lerror!(
            "system",
            LogStage::Request,
            LogComponent::Server,
            "request_failed",
            &format!("请求处理失败: {self}"),
            error_code = code
        );

        // 服务端错误不向客户端暴露内部细节
        (
            status,
            Json(json!({
                "success": false,
                "error": { "code": code, "message": "Internal server error" },
                "timestamp": Utc::now(),
            })),
        )
            .into_response()
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        auth_error_response(&self)
    }
}

fn auth_error_response(err: &AuthError) -> Response {
    let status = err.status_code();
    match err {
        AuthError::RegistrationRequired { registration_url } => {
            (status, Html(pages::registration_required_page(registration_url))).into_response()
        }
        AuthError::AccountDeleted => (status, Html(pages::account_deleted_page())).into_response(),
        _ => {
            let body = Json(json!({
                "success": false,
                "error": { "code": err.error_code(), "message": err.to_string() },
                "timestamp": Utc::now(),
            }));
            if status == StatusCode::UNAUTHORIZED {
                (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
            } else {
                (status, body).into_response()
            }
        }
    }
}
