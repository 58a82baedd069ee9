//! # 工具服务接入点
//!
//! 认证通过后的 `POST /mcp` 请求交给 [`McpHandler`]。工具调用的业务逻辑不在本 crate 内，
//! 默认的 [`WhoAmIHandler`] 只回显调用者身份，便于联调。

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::auth::AuthContext;
use crate::error::Result;

/// 已认证 MCP 请求的处理者
#[async_trait]
pub trait McpHandler: Send + Sync {
    /// 处理一条 JSON-RPC 消息
    async fn handle(&self, context: AuthContext, message: Value) -> Result<Value>;
}

/// 回显调用者身份
#[derive(Debug, Default, Clone, Copy)]
pub struct WhoAmIHandler;

#[async_trait]
impl McpHandler for WhoAmIHandler {
    async fn handle(&self, context: AuthContext, message: Value) -> Result<Value> {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        Ok(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "user_id": context.user_id,
                "email": context.email,
                "auth_method": context.auth_method().as_str(),
                "permissions": context.permissions,
            }
        }))
    }
}
