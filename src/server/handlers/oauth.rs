//! # 授权端点
//!
//! `/authorize`、`/callback`、`/token`、`/logout`

use axum::{
    Form, Json,
    extract::{Query, RawQuery, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::auth::cookie::{clear_session_cookie, session_token_from_headers};
use crate::auth::oauth_provider::{TokenError, TokenRequest};
use crate::error::Result;
use crate::server::response::{success_without_data, with_cookie};
use crate::server::state::AppState;
use crate::{
    linfo, lwarn,
    logging::{LogComponent, LogStage},
};

/// `GET /authorize`
pub async fn authorize(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response> {
    let session_token = session_token_from_headers(&headers);
    let outcome = state
        .orchestrator
        .authorize(query.as_deref().unwrap_or_default(), session_token.as_deref())
        .await?;
    Ok(outcome.into_response())
}

/// 身份提供商回调参数
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// `GET /callback`
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Response> {
    if let Some(error) = &params.error {
        lwarn!(
            "system",
            LogStage::Callback,
            LogComponent::OAuth,
            "provider_error",
            "身份提供商返回错误",
            error = %error
        );
    }
    let outcome = state
        .orchestrator
        .callback(params.code.as_deref(), params.state.as_deref())
        .await?;
    Ok(outcome.into_response())
}

/// `POST /token`
pub async fn token(
    State(state): State<AppState>,
    Form(request): Form<TokenRequest>,
) -> std::result::Result<Response, TokenError> {
    let response = state.oauth.exchange_code(&request).await?;
    Ok(([(header::CACHE_CONTROL, "no-store")], Json(response)).into_response())
}

/// `GET /logout`：删除会话并清除 Cookie
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    if let Some(token) = session_token_from_headers(&headers) {
        let removed = state.sessions.revoke(&token).await?;
        linfo!(
            "system",
            LogStage::Session,
            LogComponent::Session,
            "logout",
            "用户登出",
            session_removed = removed
        );
    }
    let clear = clear_session_cookie(state.cookie_domain());
    Ok(with_cookie(success_without_data("已登出"), Some(&clear)))
}
