//! # 身份提供商客户端
//!
//! [`IdentityProvider`] 抽象上游身份提供商；[`WorkOsClient`] 是基于 `reqwest` 的
//! WorkOS User Management 实现。

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::config::WorkOsConfig;
use crate::error::{GatewayError, Result};
use crate::{
    ldebug, lwarn,
    logging::{LogComponent, LogStage},
};

/// 上游返回的用户信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// 认证成功响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationResponse {
    pub user: IdentityUser,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub organization_id: Option<String>,
}

/// 上游身份提供商
///
/// 任何上游拒绝或传输失败都返回 `Err`，调用方负责映射成对外错误。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// 构建携带 PKCE challenge 的授权跳转地址
    fn authorization_url(&self, redirect_uri: &str, state: &str, code_challenge: &str)
    -> Result<String>;

    /// 用授权码和 verifier 换取令牌
    async fn authenticate_with_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<AuthenticationResponse>;

    /// 用刷新令牌换取新令牌（刷新令牌会轮换）
    async fn authenticate_with_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<AuthenticationResponse>;
}

#[derive(Serialize)]
struct AuthenticateRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_verifier: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

/// 上游错误响应
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// WorkOS User Management 客户端
#[derive(Debug, Clone)]
pub struct WorkOsClient {
    http_client: reqwest::Client,
    base_url: Url,
    client_id: String,
    api_key: String,
}

impl WorkOsClient {
    /// 创建新的客户端
    pub fn new(config: &WorkOsConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("mcp-sso-auth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::server_init_with_source("创建 HTTP 客户端失败", e))?;

        let base_url = Url::parse(&config.api_base_url).map_err(|e| {
            GatewayError::config_with_source(
                format!("无效的 workos.api_base_url: {}", config.api_base_url),
                e,
            )
        })?;

        Ok(Self {
            http_client,
            base_url,
            client_id: config.client_id.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::config_with_source(format!("无法拼接地址: {path}"), e))
    }

    async fn authenticate(
        &self,
        request: &AuthenticateRequest<'_>,
    ) -> Result<AuthenticationResponse> {
        let url = self.endpoint("/user_management/authenticate")?;
        let response = self
            .http_client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::network_with_source("身份提供商请求失败", e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.json::<ErrorResponse>().await.ok();
            let reason = body
                .as_ref()
                .and_then(|b| b.error_description.as_deref().or(b.error.as_deref()))
                .unwrap_or("unknown");
            lwarn!(
                "system",
                LogStage::Authentication,
                LogComponent::IdentityProvider,
                "authenticate_rejected",
                &format!("身份提供商拒绝认证: {reason}"),
                grant_type = request.grant_type,
                status = status.as_u16()
            );
            return Err(GatewayError::network(format!(
                "身份提供商返回 {status} ({})",
                request.grant_type
            )));
        }

        let parsed = response
            .json::<AuthenticationResponse>()
            .await
            .map_err(|e| GatewayError::network_with_source("无法解析身份提供商响应", e))?;

        ldebug!(
            "system",
            LogStage::Authentication,
            LogComponent::IdentityProvider,
            "authenticate_ok",
            "身份提供商认证成功",
            grant_type = request.grant_type,
            user_id = %parsed.user.id
        );
        Ok(parsed)
    }
}

#[async_trait]
impl IdentityProvider for WorkOsClient {
    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> Result<String> {
        let mut url = self.endpoint("/user_management/authorize")?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("provider", "authkit")
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(url.into())
    }

    async fn authenticate_with_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<AuthenticationResponse> {
        self.authenticate(&AuthenticateRequest {
            client_id: &self.client_id,
            client_secret: &self.api_key,
            grant_type: "authorization_code",
            code: Some(code),
            code_verifier: Some(code_verifier),
            refresh_token: None,
        })
        .await
    }

    async fn authenticate_with_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<AuthenticationResponse> {
        self.authenticate(&AuthenticateRequest {
            client_id: &self.client_id,
            client_secret: &self.api_key,
            grant_type: "refresh_token",
            code: None,
            code_verifier: None,
            refresh_token: Some(refresh_token),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> WorkOsClient {
        WorkOsClient::new(&WorkOsConfig {
            client_id: "client_123".to_string(),
            api_key: "sk_test".to_string(),
            ..WorkOsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_authorization_url_carries_pkce() {
        let url = client()
            .authorization_url("https://mcp.example.com/callback", "st@te", "challenge123")
            .unwrap();
        let parsed = Url::parse(&url).unwrap();

        assert_eq!(parsed.path(), "/user_management/authorize");
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client_123");
        assert_eq!(pairs["redirect_uri"], "https://mcp.example.com/callback");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["provider"], "authkit");
        assert_eq!(pairs["state"], "st@te");
        assert_eq!(pairs["code_challenge"], "challenge123");
        assert_eq!(pairs["code_challenge_method"], "S256");
    }

    #[test]
    fn test_refresh_request_shape() {
        let body = serde_json::to_value(AuthenticateRequest {
            client_id: "c",
            client_secret: "s",
            grant_type: "refresh_token",
            code: None,
            code_verifier: None,
            refresh_token: Some("rt"),
        })
        .unwrap();
        assert_eq!(body["grant_type"], "refresh_token");
        assert_eq!(body["refresh_token"], "rt");
        assert!(body.get("code").is_none());
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = WorkOsClient::new(&WorkOsConfig {
            api_base_url: "not a url".to_string(),
            ..WorkOsConfig::default()
        });
        assert!(matches!(result, Err(GatewayError::Config { .. })));
    }

    #[test]
    fn test_response_parses_workos_shape() {
        let raw = r#"{
            "user": {"id": "user_01", "email": "a@example.com", "first_name": "A", "last_name": null, "object": "user"},
            "organization_id": null,
            "access_token": "at",
            "refresh_token": "rt",
            "authentication_method": "GoogleOAuth"
        }"#;
        let parsed: AuthenticationResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.user.email, "a@example.com");
        assert_eq!(parsed.refresh_token, "rt");
    }

    fn mock_client(server: &wiremock::MockServer) -> WorkOsClient {
        WorkOsClient::new(&WorkOsConfig {
            api_base_url: server.uri(),
            client_id: "client_123".to_string(),
            api_key: "sk_test".to_string(),
            ..WorkOsConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_authenticate_with_code_posts_verifier() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, ResponseTemplate};

        let server = wiremock::MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user_management/authenticate"))
            .and(body_partial_json(serde_json::json!({
                "client_id": "client_123",
                "client_secret": "sk_test",
                "grant_type": "authorization_code",
                "code": "code-1",
                "code_verifier": "verifier-1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "user": {"id": "user_01", "email": "a@example.com"},
                "access_token": "at",
                "refresh_token": "rt"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = mock_client(&server)
            .authenticate_with_code("code-1", "verifier-1")
            .await
            .unwrap();
        assert_eq!(response.user.id, "user_01");
        assert_eq!(response.access_token, "at");
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_network_error() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, ResponseTemplate};

        let server = wiremock::MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user_management/authenticate"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Refresh token already used"
            })))
            .mount(&server)
            .await;

        let result = mock_client(&server)
            .authenticate_with_refresh_token("rt-old")
            .await;
        assert!(matches!(result, Err(GatewayError::Network { .. })));
    }
}
