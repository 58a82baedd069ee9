//! # MCP SSO Auth
//!
//! MCP 服务的认证子系统：OAuth 2.1 + PKCE 授权码流程（集中式 SSO 会话、刷新令牌轮换）
//! 与长期 API Key 两条路径，产出统一的 [`auth::AuthContext`]。

pub mod auth;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod server;
pub mod testing;

// Re-export commonly used types
pub use auth::AuthContext;
pub use config::AppConfig;
pub use error::{AuthError, GatewayError, Result};
