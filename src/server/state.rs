//! # 应用状态
//!
//! 所有组件在启动时装配一次，之后以 `Arc` 共享给各个处理器。

use sea_orm::DatabaseConnection;
use std::ops::Deref;
use std::sync::Arc;

use super::mcp::McpHandler;
use crate::auth::{
    ApiKeyManager, AuthOrchestrator, CacheSessionStore, IdentityProvider, KvOAuthProvider,
    OrchestratorSettings, PkceManager, SeaOrmApiKeyStore, SeaOrmUserDirectory, SessionValidator,
    UserDirectory, session::SessionSettings,
};
use crate::cache::CacheProvider;
use crate::config::AppConfig;

/// 装配好的服务集合
pub struct AppServices {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub cache: Arc<dyn CacheProvider>,
    pub users: Arc<dyn UserDirectory>,
    pub sessions: Arc<SessionValidator>,
    pub oauth: Arc<KvOAuthProvider>,
    pub orchestrator: AuthOrchestrator,
    pub api_keys: ApiKeyManager,
    pub mcp: Arc<dyn McpHandler>,
}

impl AppServices {
    /// 按配置装配全部组件
    #[must_use]
    pub fn build(
        config: AppConfig,
        db: Arc<DatabaseConnection>,
        cache: Arc<dyn CacheProvider>,
        identity: Arc<dyn IdentityProvider>,
        mcp: Arc<dyn McpHandler>,
    ) -> Self {
        let users: Arc<dyn UserDirectory> = Arc::new(SeaOrmUserDirectory::new(Arc::clone(&db)));

        let sessions = Arc::new(SessionValidator::new(
            Arc::new(CacheSessionStore::new(Arc::clone(&cache))),
            Arc::clone(&identity),
            SessionSettings::from(&config.session),
        ));

        let oauth = Arc::new(
            KvOAuthProvider::new(Arc::clone(&cache), Arc::clone(&users)).with_config(&config.oauth),
        );

        let orchestrator = AuthOrchestrator::new(
            oauth.clone(),
            Arc::clone(&sessions),
            PkceManager::new(Arc::clone(&cache)),
            identity,
            Arc::clone(&users),
            OrchestratorSettings::from(&config),
        );

        let api_keys = ApiKeyManager::new(
            Arc::new(SeaOrmApiKeyStore::new(Arc::clone(&db))),
            Arc::clone(&users),
        );

        Self {
            config: Arc::new(config),
            db,
            cache,
            users,
            sessions,
            oauth,
            orchestrator,
            api_keys,
            mcp,
        }
    }

    /// `Set-Cookie` 使用的域名
    #[must_use]
    pub fn cookie_domain(&self) -> Option<&str> {
        self.config.workos.cookie_domain.as_deref()
    }
}

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    services: Arc<AppServices>,
}

impl AppState {
    #[must_use]
    pub fn new(services: AppServices) -> Self {
        Self {
            services: Arc::new(services),
        }
    }
}

impl Deref for AppState {
    type Target = AppServices;

    fn deref(&self) -> &Self::Target {
        &self.services
    }
}
