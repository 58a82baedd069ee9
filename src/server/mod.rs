//! # HTTP 服务
//!
//! axum 路由、中间件和启动流程

pub mod handlers;
pub mod mcp;
pub mod middleware;
pub mod response;
pub mod state;

use axum::Router;
use axum::routing::{delete, get, post};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use mcp::{McpHandler, WhoAmIHandler};
pub use state::{AppServices, AppState};

use crate::auth::WorkOsClient;
use crate::auth::router::MCP_PATH;
use crate::cache::create_cache_provider;
use crate::config::AppConfig;
use crate::database::{init_database, run_migrations};
use crate::error::{Context, GatewayError, Result};
use crate::{
    lerror, linfo,
    logging::{LogComponent, LogStage},
};

/// 创建路由器
pub fn create_router(state: AppState) -> Router {
    let mcp_routes = Router::new()
        .route(MCP_PATH, post(handlers::mcp))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::mcp_auth_middleware,
        ));

    Router::new()
        .route("/authorize", get(handlers::oauth::authorize))
        .route("/callback", get(handlers::oauth::callback))
        .route("/token", post(handlers::oauth::token))
        .route("/logout", get(handlers::oauth::logout))
        .route(
            "/api-keys",
            get(handlers::api_keys::list_keys).post(handlers::api_keys::create_key),
        )
        .route("/api-keys/{id}", delete(handlers::api_keys::revoke_key))
        .route("/health", get(handlers::health))
        .merge(mcp_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::request_id_middleware)),
        )
        .with_state(state)
}

/// 连接存储、装配组件并启动 HTTP 服务，直到收到 Ctrl-C
pub async fn run_server(config: AppConfig, mcp: Arc<dyn McpHandler>) -> Result<()> {
    config.validate().map_err(GatewayError::config)?;

    let db = Arc::new(
        init_database(&config.database)
            .await
            .context("初始化数据库失败")?,
    );
    run_migrations(&db).await.context("数据库迁移失败")?;
    let cache = create_cache_provider(&config.cache)
        .await
        .context("初始化缓存失败")?;
    let identity = Arc::new(WorkOsClient::new(&config.workos)?);

    let bind_address = config.server.bind_address();
    let state = AppState::new(AppServices::build(config, db, cache, identity, mcp));
    let router = create_router(state);

    let listener = TcpListener::bind(&bind_address).await.map_err(|e| {
        GatewayError::server_init_with_source(format!("无法监听 {bind_address}"), e)
    })?;
    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Server,
        "server_start",
        &format!("HTTP 服务监听于 {bind_address}")
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| GatewayError::server_init_with_source("HTTP 服务异常退出", e))?;

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::Server,
        "server_stopped",
        "HTTP 服务已停止"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        lerror!(
            "system",
            LogStage::Shutdown,
            LogComponent::Server,
            "signal_failed",
            &format!("无法监听关闭信号: {e}")
        );
    }
}
