//! # 认证类型定义
//!
//! 两条认证路径最终都产出 [`AuthContext`]，交给工具服务层使用。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 已认证请求的身份上下文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// 用户ID
    pub user_id: String,
    /// 邮箱
    pub email: String,
    /// 权限列表（来自身份提供商访问令牌的 `permissions` 声明）
    #[serde(default)]
    pub permissions: Vec<String>,
    /// 其他附加属性
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl AuthContext {
    #[must_use]
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            permissions: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    /// 附加属性
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// 产生该上下文的认证方式
    #[must_use]
    pub fn auth_method(&self) -> AuthMethod {
        match self.extra.get(AUTH_METHOD_KEY).map(String::as_str) {
            Some("api_key") => AuthMethod::ApiKey,
            _ => AuthMethod::OAuth,
        }
    }
}

/// `extra` 中记录认证方式的键
pub const AUTH_METHOD_KEY: &str = "auth_method";

/// 认证方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// 长期 API Key
    ApiKey,
    /// OAuth 访问令牌
    OAuth,
}

impl AuthMethod {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::OAuth => "oauth",
        }
    }
}
