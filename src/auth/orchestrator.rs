//! # 授权编排
//!
//! `/authorize` 和 `/callback` 背后的状态机：
//!
//! - 已有有效 SSO 会话：直接查用户、签发授权码（SSO 快捷路径）
//! - 配置了集中登录地址：跳转过去，登录后带着 SSO Cookie 回到 `/authorize`
//! - 否则生成 PKCE，把客户端请求编码进 `state`，跳转到身份提供商；回调时兑换授权码
//!
//! 会话失效不会对外暴露，一律转成登录跳转。

use base64::engine::{Engine, general_purpose::URL_SAFE_NO_PAD};
use entity::users;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::cookie::build_session_cookie;
use super::identity_provider::IdentityProvider;
use super::jwt_claims::ClaimsParser;
use super::oauth_provider::{AuthRequest, OAuthProvider};
use super::pkce::PkceManager;
use super::session::{SessionValidation, SessionValidator};
use super::types::AuthContext;
use super::user_directory::UserDirectory;
use crate::config::AppConfig;
use crate::error::{AuthError, GatewayError, Result};
use crate::{
    ldebug, linfo, lwarn,
    logging::{LogComponent, LogStage},
};

/// 编排器需要的地址配置
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    /// 本服务对外地址（无末尾 `/`）
    pub public_url: String,
    /// 身份提供商回调地址
    pub callback_url: String,
    pub central_login_url: Option<String>,
    pub registration_url: String,
    pub cookie_domain: Option<String>,
}

impl From<&AppConfig> for OrchestratorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            public_url: config.server.public_url.trim_end_matches('/').to_string(),
            callback_url: config.server.callback_url(),
            central_login_url: config
                .workos
                .central_login_url
                .clone()
                .filter(|url| !url.is_empty()),
            registration_url: config.workos.registration_url.clone(),
            cookie_domain: config.workos.cookie_domain.clone(),
        }
    }
}

/// 授权流程的 HTTP 结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowResponse {
    /// 302 跳转
    Redirect {
        location: String,
        set_cookie: Option<String>,
    },
    /// 过渡页，自动跳回客户端
    SuccessPage {
        redirect_url: String,
        set_cookie: Option<String>,
    },
}

impl FlowResponse {
    #[must_use]
    pub fn set_cookie(&self) -> Option<&str> {
        match self {
            Self::Redirect { set_cookie, .. } | Self::SuccessPage { set_cookie, .. } => {
                set_cookie.as_deref()
            }
        }
    }
}

/// 编码进 `state` 的流程上下文
#[derive(Debug, Serialize, Deserialize)]
struct FlowState {
    request: AuthRequest,
    nonce: String,
}

fn encode_state(request: &AuthRequest) -> Result<String> {
    let mut nonce = [0u8; 16];
    OsRng.fill_bytes(&mut nonce);
    let state = FlowState {
        request: request.clone(),
        nonce: URL_SAFE_NO_PAD.encode(nonce),
    };
    let json = serde_json::to_vec(&state)
        .map_err(|e| GatewayError::serialization("无法编码授权 state", e))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_state(state: &str) -> std::result::Result<AuthRequest, AuthError> {
    let invalid = || AuthError::InvalidRequest("invalid state".to_string());
    let raw = URL_SAFE_NO_PAD.decode(state).map_err(|_| invalid())?;
    let flow: FlowState = serde_json::from_slice(&raw).map_err(|_| invalid())?;
    if flow.request.client_id.is_empty() {
        return Err(invalid());
    }
    Ok(flow.request)
}

/// 授权编排器
#[derive(Clone)]
pub struct AuthOrchestrator {
    oauth: Arc<dyn OAuthProvider>,
    sessions: Arc<SessionValidator>,
    pkce: PkceManager,
    identity: Arc<dyn IdentityProvider>,
    users: Arc<dyn UserDirectory>,
    claims: ClaimsParser,
    settings: OrchestratorSettings,
}

impl AuthOrchestrator {
    #[must_use]
    pub fn new(
        oauth: Arc<dyn OAuthProvider>,
        sessions: Arc<SessionValidator>,
        pkce: PkceManager,
        identity: Arc<dyn IdentityProvider>,
        users: Arc<dyn UserDirectory>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            oauth,
            sessions,
            pkce,
            identity,
            users,
            claims: ClaimsParser::new(),
            settings,
        }
    }

    /// 处理 `/authorize`
    pub async fn authorize(
        &self,
        raw_query: &str,
        session_cookie: Option<&str>,
    ) -> Result<FlowResponse> {
        let request = self.oauth.parse_auth_request(raw_query)?;

        if let Some(token) = session_cookie.filter(|t| !t.is_empty()) {
            match self.sessions.validate(token).await {
                Ok(SessionValidation::Valid(session)) => {
                    linfo!(
                        "system",
                        LogStage::Authorization,
                        LogComponent::OAuth,
                        "sso_shortcut",
                        "复用已有 SSO 会话",
                        client_id = %request.client_id,
                        user_id = %session.user_id
                    );
                    let user = self.resolve_user(&request, &session.email).await?;
                    let redirect_url = self.complete(&request, &user, Vec::new()).await?;
                    return Ok(FlowResponse::SuccessPage {
                        redirect_url,
                        set_cookie: None,
                    });
                }
                Ok(SessionValidation::Invalid(reason)) => {
                    ldebug!(
                        "system",
                        LogStage::Authorization,
                        LogComponent::OAuth,
                        "session_invalid",
                        "SSO 会话无效，转入登录",
                        reason = reason.as_str()
                    );
                }
                Err(e) => {
                    lwarn!(
                        "system",
                        LogStage::Authorization,
                        LogComponent::OAuth,
                        "session_lookup_failed",
                        &format!("读取 SSO 会话失败，转入登录: {e}")
                    );
                }
            }
        }

        if let Some(central_login_url) = &self.settings.central_login_url {
            let mut location = url::Url::parse(central_login_url).map_err(|e| {
                GatewayError::config_with_source("无效的 workos.central_login_url", e)
            })?;
            location
                .query_pairs_mut()
                .append_pair("return_to", &self.authorize_url(&request));
            return Ok(FlowResponse::Redirect {
                location: location.into(),
                set_cookie: None,
            });
        }

        let pair = self.pkce.generate_challenge();
        let state = encode_state(&request)?;
        self.pkce.store_verifier(&state, &pair.code_verifier).await?;
        let location = self.identity.authorization_url(
            &self.settings.callback_url,
            &state,
            &pair.code_challenge,
        )?;

        ldebug!(
            "system",
            LogStage::Authorization,
            LogComponent::OAuth,
            "provider_redirect",
            "跳转到身份提供商",
            client_id = %request.client_id
        );
        Ok(FlowResponse::Redirect {
            location,
            set_cookie: None,
        })
    }

    /// 处理身份提供商 `/callback`
    pub async fn callback(&self, code: Option<&str>, state: Option<&str>) -> Result<FlowResponse> {
        let state = state
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::InvalidRequest("missing state".to_string()))?;
        let request = decode_state(state)?;
        // 注册表可能在授权开始后变更
        self.oauth.parse_auth_request(&request.to_query_string())?;
        let code = code.filter(|c| !c.is_empty()).ok_or(AuthError::MissingCode)?;

        let Some(code_verifier) = self.pkce.consume_verifier(state).await? else {
            return Err(AuthError::MissingVerifier.into());
        };

        let auth = self
            .identity
            .authenticate_with_code(code, &code_verifier)
            .await
            .map_err(|e| {
                lwarn!(
                    "system",
                    LogStage::Callback,
                    LogComponent::OAuth,
                    "code_exchange_failed",
                    &format!("授权码兑换失败: {e}"),
                    client_id = %request.client_id
                );
                AuthError::UpstreamAuthFailure
            })?;

        let permissions = self.claims.extract_permissions(&auth.access_token);
        let user = self.resolve_user(&request, &auth.user.email).await?;
        let redirect_url = self.complete(&request, &user, permissions).await?;

        let set_cookie = match self
            .sessions
            .create_session(&user.id, &user.email, Some(auth.refresh_token))
            .await
        {
            Ok(session) => Some(build_session_cookie(
                &session.session_token,
                self.settings.cookie_domain.as_deref(),
            )),
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Callback,
                    LogComponent::Session,
                    "create_session_failed",
                    &format!("创建本地 SSO 会话失败: {e}"),
                    user_id = %user.id
                );
                None
            }
        };

        Ok(FlowResponse::SuccessPage {
            redirect_url,
            set_cookie,
        })
    }

    fn authorize_url(&self, request: &AuthRequest) -> String {
        format!(
            "{}/authorize?{}",
            self.settings.public_url,
            request.to_query_string()
        )
    }

    /// 确认邮箱对应的本地用户存在且未删除
    async fn resolve_user(&self, request: &AuthRequest, email: &str) -> Result<users::Model> {
        let Some(user) = self.users.get_user_by_email(email).await? else {
            linfo!(
                "system",
                LogStage::Authorization,
                LogComponent::OAuth,
                "registration_required",
                "用户尚未注册",
                client_id = %request.client_id
            );
            return Err(AuthError::RegistrationRequired {
                registration_url: self.registration_url(request),
            }
            .into());
        };
        if !user.is_active() {
            linfo!(
                "system",
                LogStage::Authorization,
                LogComponent::OAuth,
                "account_deleted",
                "用户已被删除",
                user_id = %user.id
            );
            return Err(AuthError::AccountDeleted.into());
        }
        Ok(user)
    }

    fn registration_url(&self, request: &AuthRequest) -> String {
        let return_to = self.authorize_url(request);
        match url::Url::parse(&self.settings.registration_url) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("returnTo", &return_to);
                url.into()
            }
            Err(_) => format!(
                "{}?returnTo={}",
                self.settings.registration_url,
                urlencoding::encode(&return_to)
            ),
        }
    }

    async fn complete(
        &self,
        request: &AuthRequest,
        user: &users::Model,
        permissions: Vec<String>,
    ) -> Result<String> {
        let context = AuthContext::new(&user.id, &user.email).with_permissions(permissions);
        self.oauth.complete_authorization(request, &context).await
    }
}
