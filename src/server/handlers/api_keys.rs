//! # API Key 管理端点
//!
//! 需要有效的 SSO 会话 Cookie；只能操作自己名下的密钥。

use axum::{
    Json,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::Response,
};
use serde::Deserialize;

use crate::auth::SessionValidation;
use crate::auth::cookie::session_token_from_headers;
use crate::error::{AuthError, GatewayError, Result};
use crate::server::response::{created, error, success, success_without_data};
use crate::server::state::AppState;

/// 通过会话 Cookie 认证的用户
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: String,
    pub email: String,
}

impl FromRequestParts<AppState> for SessionUser {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token =
            session_token_from_headers(&parts.headers).ok_or(AuthError::Unauthenticated)?;
        let SessionValidation::Valid(session) = state.sessions.validate(&token).await? else {
            return Err(AuthError::Unauthenticated.into());
        };
        let active = state
            .users
            .get_user_by_id(&session.user_id)
            .await?
            .is_some_and(|user| user.is_active());
        if !active {
            return Err(AuthError::Unauthenticated.into());
        }
        Ok(Self {
            user_id: session.user_id,
            email: session.email,
        })
    }
}

/// `GET /api-keys`
pub async fn list_keys(State(state): State<AppState>, user: SessionUser) -> Result<Response> {
    Ok(success(state.api_keys.list(&user.user_id).await?))
}

/// 创建请求
#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default)]
    pub expires_in_days: Option<u32>,
}

/// `POST /api-keys`，明文只在这里返回一次
pub async fn create_key(
    State(state): State<AppState>,
    user: SessionUser,
    Json(request): Json<CreateKeyRequest>,
) -> Result<Response> {
    let expires_in_days = request
        .expires_in_days
        .or(state.config.api_keys.default_expires_in_days);
    let issued = state
        .api_keys
        .generate(&user.user_id, &request.name, expires_in_days)
        .await?;
    Ok(created(issued, "请妥善保存密钥，它不会再次显示"))
}

/// `DELETE /api-keys/{id}`
pub async fn revoke_key(
    State(state): State<AppState>,
    user: SessionUser,
    Path(id): Path<String>,
) -> Result<Response> {
    if state.api_keys.revoke(&id, &user.user_id).await? {
        Ok(success_without_data("密钥已吊销"))
    } else {
        Ok(error(
            StatusCode::NOT_FOUND,
            "API_KEY_NOT_FOUND",
            "API key not found",
        ))
    }
}
