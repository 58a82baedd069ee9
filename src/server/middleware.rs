//! # 中间件
//!
//! 请求 ID 注入，以及 `/mcp` 的认证分发。

use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::fmt;
use std::ops::Deref;
use uuid::Uuid;

use super::state::AppState;
use crate::auth::router::bearer_token;
use crate::auth::{AuthRoute, classify};
use crate::error::AuthError;
use crate::{
    ldebug,
    logging::{LogComponent, LogStage},
};

/// 请求ID类型
#[derive(Debug, Clone)]
pub struct RequestId(String);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Deref for RequestId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// 请求ID中间件
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::new();
    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// `/mcp` 认证：API Key 或本地 OAuth 访问令牌，成功后把 `AuthContext` 放进请求扩展
pub async fn mcp_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map_or_else(|| "-".to_string(), ToString::to_string);
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let route = classify(request.method(), request.uri().path(), authorization);
    let resolved = match route {
        AuthRoute::ApiKey(token) => state.api_keys.validate(&token).await.map(Some),
        AuthRoute::OAuth => match authorization.and_then(bearer_token) {
            Some(token) => state.oauth.resolve_access_token(token).await,
            None => Ok(None),
        },
    };

    let context = match resolved {
        Ok(Some(context)) => context,
        Ok(None) => return AuthError::Unauthenticated.into_response(),
        Err(e) => return e.into_response(),
    };

    ldebug!(
        &request_id,
        LogStage::Authentication,
        LogComponent::Router,
        "mcp_auth",
        "请求已认证",
        user_id = %context.user_id,
        auth_method = context.auth_method().as_str()
    );
    request.extensions_mut().insert(context);
    next.run(request).await
}
