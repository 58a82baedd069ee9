//! # 认证授权模块
//!
//! 两条认证路径：交互式 OAuth 2.1 + PKCE（带集中式 SSO 会话）和长期 API Key。
//! 两者最终都产出 [`AuthContext`]。

pub mod api_key;
pub mod cookie;
pub mod identity_provider;
pub mod jwt_claims;
pub mod oauth_provider;
pub mod orchestrator;
pub mod pages;
pub mod pkce;
pub mod router;
pub mod session;
pub mod types;
pub mod user_directory;

pub use api_key::{ApiKeyManager, ApiKeyStore, SeaOrmApiKeyStore};
pub use identity_provider::{IdentityProvider, WorkOsClient};
pub use oauth_provider::{KvOAuthProvider, OAuthProvider};
pub use orchestrator::{AuthOrchestrator, FlowResponse, OrchestratorSettings};
pub use pkce::PkceManager;
pub use router::{AuthRoute, classify};
pub use session::{CacheSessionStore, SessionStore, SessionValidation, SessionValidator};
pub use types::{AuthContext, AuthMethod};
pub use user_directory::{SeaOrmUserDirectory, UserDirectory};
