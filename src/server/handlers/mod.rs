//! # 请求处理器

pub mod api_keys;
pub mod oauth;

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use super::state::AppState;
use crate::auth::AuthContext;
use crate::error::Result;
use crate::{
    lwarn,
    logging::{LogComponent, LogStage},
};

/// `POST /mcp`，`AuthContext` 由认证中间件注入
pub async fn mcp(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(message): Json<Value>,
) -> Result<Response> {
    let reply = state.mcp.handle(context, message).await?;
    Ok(Json(reply).into_response())
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    let database_ok = match state.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            lwarn!(
                "system",
                LogStage::Database,
                LogComponent::Server,
                "health_db_failed",
                &format!("数据库健康检查失败: {e}")
            );
            false
        }
    };
    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if database_ok { "ok" } else { "degraded" },
            "database": database_ok,
            "cache": state.cache.backend(),
        })),
    )
        .into_response()
}
