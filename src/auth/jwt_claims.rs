//! # 访问令牌声明解析
//!
//! 从身份提供商返回的 `access_token` 中读取 `permissions` 等声明。
//! 令牌由身份提供商在同一次 TLS 交换中直接签发，这里只解码 payload，不校验签名。

use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lwarn};
use jsonwebtoken::dangerous::insecure_decode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 访问令牌 payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// 主体（用户ID）
    pub sub: Option<String>,
    /// 会话ID
    pub sid: Option<String>,
    /// 组织ID
    pub org_id: Option<String>,
    /// 角色
    pub role: Option<String>,
    /// 权限列表
    #[serde(default)]
    pub permissions: Vec<String>,
    /// 其他声明
    #[serde(flatten)]
    pub other: HashMap<String, serde_json::Value>,
}

/// JWT 解析器
#[derive(Debug, Clone, Default)]
pub struct ClaimsParser;

impl ClaimsParser {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// 解码访问令牌；不是 JWT 时返回 `None`
    #[must_use]
    pub fn parse(&self, access_token: &str) -> Option<AccessTokenClaims> {
        match insecure_decode::<AccessTokenClaims>(access_token) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Callback,
                    LogComponent::IdentityProvider,
                    "parse_access_token",
                    &format!("访问令牌不是可解析的 JWT: {e}")
                );
                None
            }
        }
    }

    /// 提取权限列表；无法解析时为空
    #[must_use]
    pub fn extract_permissions(&self, access_token: &str) -> Vec<String> {
        let permissions = self
            .parse(access_token)
            .map(|claims| claims.permissions)
            .unwrap_or_default();

        ldebug!(
            "system",
            LogStage::Callback,
            LogComponent::IdentityProvider,
            "extract_permissions",
            "已提取访问令牌权限",
            count = permissions.len()
        );
        permissions
    }
}
