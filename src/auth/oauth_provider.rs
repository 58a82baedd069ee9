//! # 本地 OAuth 2.1 授权服务
//!
//! MCP 客户端面对的是本服务自己的授权端点：[`OAuthProvider`] 负责解析客户端的授权请求，
//! 并在用户身份确认后签发一次性授权码。[`KvOAuthProvider`] 把授权码和访问令牌都放在
//! 键值存储里，授权码兑换时校验客户端绑定和 S256 PKCE。
//!
//! 只接受配置中注册过的客户端，`redirect_uri` 必须在该客户端的白名单内。

use async_trait::async_trait;
use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::engine::{Engine, general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::{Host, Url};

use super::pkce::{CHALLENGE_METHOD_S256, verify_s256};
use super::types::{AUTH_METHOD_KEY, AuthContext, AuthMethod};
use super::user_directory::UserDirectory;
use crate::cache::keys::{OAUTH_GRANT_TTL, OAUTH_TOKEN_TTL};
use crate::cache::{CacheKeyBuilder, CacheProvider, CacheProviderExt};
use crate::config::{OAuthClientConfig, OAuthConfig};
use crate::error::{AuthError, GatewayError, Result};
use crate::{
    ldebug, linfo, lwarn,
    logging::{LogComponent, LogStage},
};

/// 客户端授权请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub state: Option<String>,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

impl AuthRequest {
    /// 还原为 `/authorize` 的查询串
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("response_type", &self.response_type)
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri);
        if !self.scope.is_empty() {
            query.append_pair("scope", &self.scope.join(" "));
        }
        if let Some(state) = &self.state {
            query.append_pair("state", state);
        }
        query
            .append_pair("code_challenge", &self.code_challenge)
            .append_pair("code_challenge_method", &self.code_challenge_method);
        query.finish()
    }
}

/// 本地授权服务
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// 解析 `/authorize` 查询串，缺少必需参数时返回 `InvalidRequest`
    fn parse_auth_request(&self, raw_query: &str) -> Result<AuthRequest>;

    /// 为已认证用户签发授权码，返回带 `code` 和 `state` 的客户端回调地址
    async fn complete_authorization(
        &self,
        request: &AuthRequest,
        context: &AuthContext,
    ) -> Result<String>;
}

/// 授权码记录
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GrantRecord {
    client_id: String,
    redirect_uri: String,
    scope: Vec<String>,
    code_challenge: String,
    context: AuthContext,
    issued_at: DateTime<Utc>,
}

/// 访问令牌记录
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenRecord {
    client_id: String,
    scope: Vec<String>,
    context: AuthContext,
    expires_at: DateTime<Utc>,
}

/// `POST /token` 表单
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

/// 令牌响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// 令牌端点错误（RFC 6749 §5.2）
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid_request: {0}")]
    InvalidRequest(&'static str),

    #[error("invalid_grant: {0}")]
    InvalidGrant(&'static str),

    #[error("unsupported_grant_type")]
    UnsupportedGrantType,

    #[error(transparent)]
    Internal(#[from] GatewayError),
}

impl TokenError {
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::Internal(_) => "server_error",
        }
    }
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = self {
            return err.into_response();
        }
        let description = match &self {
            Self::InvalidRequest(d) | Self::InvalidGrant(d) => Some(*d),
            Self::UnsupportedGrantType | Self::Internal(_) => None,
        };
        let body = serde_json::json!({
            "error": self.error_code(),
            "error_description": description,
        });
        (
            StatusCode::BAD_REQUEST,
            [(header::CACHE_CONTROL, "no-store")],
            Json(body),
        )
            .into_response()
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn invalid_request(message: &str) -> GatewayError {
    AuthError::InvalidRequest(message.to_string()).into()
}

fn is_loopback(url: &Url) -> bool {
    url.scheme() == "http"
        && match url.host() {
            Some(Host::Domain(domain)) => domain == "localhost",
            Some(Host::Ipv4(ip)) => ip.is_loopback(),
            Some(Host::Ipv6(ip)) => ip.is_loopback(),
            None => false,
        }
}

/// 完整比较；回环地址的端口由客户端运行时决定，不参与比较（RFC 8252 §7.3）
fn redirect_uri_matches(registered: &str, requested: &Url) -> bool {
    let Ok(registered) = Url::parse(registered) else {
        return false;
    };
    if registered == *requested {
        return true;
    }
    is_loopback(&registered)
        && registered.scheme() == requested.scheme()
        && registered.host() == requested.host()
        && registered.path() == requested.path()
        && registered.query() == requested.query()
}

/// 基于键值存储的本地授权服务
#[derive(Clone)]
pub struct KvOAuthProvider {
    cache: Arc<dyn CacheProvider>,
    users: Arc<dyn UserDirectory>,
    clients: HashMap<String, Vec<String>>,
    grant_ttl: Duration,
    token_ttl: Duration,
}

impl KvOAuthProvider {
    #[must_use]
    pub fn new(cache: Arc<dyn CacheProvider>, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            cache,
            users,
            clients: HashMap::new(),
            grant_ttl: OAUTH_GRANT_TTL,
            token_ttl: OAUTH_TOKEN_TTL,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: &OAuthConfig) -> Self {
        self.grant_ttl = Duration::from_secs(config.grant_ttl_seconds);
        self.token_ttl = Duration::from_secs(config.access_token_ttl_seconds);
        for client in &config.clients {
            self = self.with_client(client.clone());
        }
        self
    }

    /// 注册客户端及其回调地址
    #[must_use]
    pub fn with_client(mut self, client: OAuthClientConfig) -> Self {
        self.clients.insert(client.client_id, client.redirect_uris);
        self
    }

    fn check_redirect_uri(&self, client_id: &str, redirect_uri: &str) -> Result<()> {
        let Some(registered) = self.clients.get(client_id) else {
            lwarn!(
                "system",
                LogStage::Authorization,
                LogComponent::OAuth,
                "unknown_client",
                "拒绝未注册的客户端",
                client_id = %client_id
            );
            return Err(invalid_request("unknown client_id"));
        };
        let requested = Url::parse(redirect_uri)
            .map_err(|_| invalid_request("missing or invalid redirect_uri"))?;
        if requested.fragment().is_some()
            || !registered
                .iter()
                .any(|uri| redirect_uri_matches(uri, &requested))
        {
            lwarn!(
                "system",
                LogStage::Authorization,
                LogComponent::OAuth,
                "redirect_uri_rejected",
                "redirect_uri 未在该客户端注册",
                client_id = %client_id
            );
            return Err(invalid_request("redirect_uri is not registered for this client"));
        }
        Ok(())
    }

    /// 用授权码换访问令牌。授权码一次性取出，之后任何校验失败都不可重试。
    pub async fn exchange_code(
        &self,
        request: &TokenRequest,
    ) -> std::result::Result<TokenResponse, TokenError> {
        if request.grant_type != "authorization_code" {
            return Err(TokenError::UnsupportedGrantType);
        }
        let code = request
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(TokenError::InvalidRequest("missing code"))?;
        let code_verifier = request
            .code_verifier
            .as_deref()
            .ok_or(TokenError::InvalidRequest("missing code_verifier"))?;
        let client_id = request
            .client_id
            .as_deref()
            .ok_or(TokenError::InvalidRequest("missing client_id"))?;

        let key = CacheKeyBuilder::oauth_grant(code).build();
        let Some(grant) = self.cache.take_json::<GrantRecord>(&key).await? else {
            return Err(TokenError::InvalidGrant("unknown or expired code"));
        };

        if grant.client_id != client_id {
            return Err(TokenError::InvalidGrant("client mismatch"));
        }
        if let Some(redirect_uri) = request.redirect_uri.as_deref()
            && redirect_uri != grant.redirect_uri
        {
            return Err(TokenError::InvalidGrant("redirect_uri mismatch"));
        }
        if !verify_s256(code_verifier, &grant.code_challenge) {
            lwarn!(
                "system",
                LogStage::Authorization,
                LogComponent::OAuth,
                "exchange_code",
                "PKCE 校验失败",
                client_id = %client_id
            );
            return Err(TokenError::InvalidGrant("code_verifier mismatch"));
        }

        let access_token = random_token();
        let record = TokenRecord {
            client_id: grant.client_id,
            scope: grant.scope,
            context: grant.context,
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.token_ttl).unwrap_or(chrono::Duration::MAX),
        };
        self.cache
            .set_json(
                &CacheKeyBuilder::oauth_token(&access_token).build(),
                &record,
                self.token_ttl,
            )
            .await?;

        linfo!(
            "system",
            LogStage::Authorization,
            LogComponent::OAuth,
            "exchange_code",
            "访问令牌已签发",
            client_id = %record.client_id,
            user_id = %record.context.user_id
        );

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.token_ttl.as_secs(),
            scope: (!record.scope.is_empty()).then(|| record.scope.join(" ")),
        })
    }

    /// 解析访问令牌；令牌未知、过期或用户已不可用时返回 `None`
    pub async fn resolve_access_token(&self, access_token: &str) -> Result<Option<AuthContext>> {
        let key = CacheKeyBuilder::oauth_token(access_token).build();
        let Some(record) = self.cache.get_json::<TokenRecord>(&key).await? else {
            return Ok(None);
        };
        if record.expires_at <= Utc::now() {
            return Ok(None);
        }

        let active = self
            .users
            .get_user_by_id(&record.context.user_id)
            .await?
            .is_some_and(|user| user.is_active());
        if !active {
            ldebug!(
                "system",
                LogStage::Authentication,
                LogComponent::OAuth,
                "resolve_access_token",
                "令牌所属用户不存在或已删除",
                user_id = %record.context.user_id
            );
            return Ok(None);
        }
        Ok(Some(record.context))
    }
}

#[async_trait]
impl OAuthProvider for KvOAuthProvider {
    fn parse_auth_request(&self, raw_query: &str) -> Result<AuthRequest> {
        let mut response_type = None;
        let mut client_id = None;
        let mut redirect_uri = None;
        let mut scope = Vec::new();
        let mut state = None;
        let mut code_challenge = None;
        let mut code_challenge_method = None;

        for (name, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
            let value = value.into_owned();
            match name.as_ref() {
                "response_type" => response_type = Some(value),
                "client_id" => client_id = Some(value),
                "redirect_uri" => redirect_uri = Some(value),
                "scope" => scope = value.split_whitespace().map(str::to_string).collect(),
                "state" => state = Some(value),
                "code_challenge" => code_challenge = Some(value),
                "code_challenge_method" => code_challenge_method = Some(value),
                _ => {}
            }
        }

        let client_id = client_id
            .filter(|c| !c.is_empty())
            .ok_or_else(|| invalid_request("missing client_id"))?;
        let response_type = response_type.unwrap_or_default();
        if response_type != "code" {
            return Err(invalid_request("response_type must be code"));
        }
        let redirect_uri = redirect_uri
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| invalid_request("missing or invalid redirect_uri"))?;
        self.check_redirect_uri(&client_id, &redirect_uri)?;
        let code_challenge = code_challenge
            .filter(|c| !c.is_empty())
            .ok_or_else(|| invalid_request("missing code_challenge"))?;
        let code_challenge_method =
            code_challenge_method.unwrap_or_else(|| CHALLENGE_METHOD_S256.to_string());
        if code_challenge_method != CHALLENGE_METHOD_S256 {
            return Err(invalid_request("code_challenge_method must be S256"));
        }

        Ok(AuthRequest {
            response_type,
            client_id,
            redirect_uri,
            scope,
            state,
            code_challenge,
            code_challenge_method,
        })
    }

    async fn complete_authorization(
        &self,
        request: &AuthRequest,
        context: &AuthContext,
    ) -> Result<String> {
        let code = random_token();
        let grant = GrantRecord {
            client_id: request.client_id.clone(),
            redirect_uri: request.redirect_uri.clone(),
            scope: request.scope.clone(),
            code_challenge: request.code_challenge.clone(),
            context: context
                .clone()
                .with_extra(AUTH_METHOD_KEY, AuthMethod::OAuth.as_str()),
            issued_at: Utc::now(),
        };
        self.cache
            .set_json(
                &CacheKeyBuilder::oauth_grant(&code).build(),
                &grant,
                self.grant_ttl,
            )
            .await?;

        let mut redirect = Url::parse(&request.redirect_uri)
            .map_err(|_| invalid_request("missing or invalid redirect_uri"))?;
        redirect.query_pairs_mut().append_pair("code", &code);
        if let Some(state) = &request.state {
            redirect.query_pairs_mut().append_pair("state", state);
        }

        linfo!(
            "system",
            LogStage::Authorization,
            LogComponent::OAuth,
            "complete_authorization",
            "授权码已签发",
            client_id = %request.client_id,
            user_id = %context.user_id
        );
        Ok(redirect.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::pkce::generate_challenge;
    use crate::auth::user_directory::SeaOrmUserDirectory;
    use crate::cache::MemoryCache;
    use crate::testing::{UserFixture, create_test_db};
    use std::collections::HashMap;

    async fn provider() -> (KvOAuthProvider, Arc<sea_orm::DatabaseConnection>) {
        let db = Arc::new(create_test_db().await.unwrap());
        UserFixture::new().insert(&db).await.unwrap();
        let provider = KvOAuthProvider::new(
            Arc::new(MemoryCache::new()),
            Arc::new(SeaOrmUserDirectory::new(Arc::clone(&db))),
        )
        .with_client(OAuthClientConfig::new(
            "client-a",
            &["https://app.example/cb", "http://127.0.0.1/callback"],
        ));
        (provider, db)
    }

    fn query(challenge: &str) -> String {
        format!(
            "response_type=code&client_id=client-a&redirect_uri=https%3A%2F%2Fapp.example%2Fcb\
             &scope=mcp%20profile&state=xyz&code_challenge={challenge}&code_challenge_method=S256"
        )
    }

    fn code_from(redirect: &str) -> HashMap<String, String> {
        Url::parse(redirect).unwrap().query_pairs().into_owned().collect()
    }

    fn token_request(code: &str, verifier: &str) -> TokenRequest {
        TokenRequest {
            grant_type: "authorization_code".to_string(),
            code: Some(code.to_string()),
            code_verifier: Some(verifier.to_string()),
            client_id: Some("client-a".to_string()),
            redirect_uri: Some("https://app.example/cb".to_string()),
        }
    }

    #[tokio::test]
    async fn test_parse_auth_request() {
        let (provider, _db) = provider().await;
        let request = provider.parse_auth_request(&query("abc")).unwrap();
        assert_eq!(request.client_id, "client-a");
        assert_eq!(request.redirect_uri, "https://app.example/cb");
        assert_eq!(request.scope, vec!["mcp", "profile"]);
        assert_eq!(request.state.as_deref(), Some("xyz"));

        let reparsed = provider
            .parse_auth_request(&request.to_query_string())
            .unwrap();
        assert_eq!(reparsed, request);
    }

    #[tokio::test]
    async fn test_parse_rejects_missing_client_id() {
        let (provider, _db) = provider().await;
        let result = provider.parse_auth_request("response_type=code&code_challenge=abc");
        assert!(matches!(
            result,
            Err(GatewayError::Auth(AuthError::InvalidRequest(_)))
        ));
        let plain = provider.parse_auth_request(
            "response_type=code&client_id=client-a&redirect_uri=https%3A%2F%2Fapp.example%2Fcb&code_challenge=x&code_challenge_method=plain",
        );
        assert!(plain.is_err());
    }

    fn assert_invalid_request(result: Result<AuthRequest>) {
        assert!(matches!(
            result,
            Err(GatewayError::Auth(AuthError::InvalidRequest(_)))
        ));
    }

    #[tokio::test]
    async fn test_parse_rejects_unregistered_clients_and_redirects() {
        let (provider, _db) = provider().await;
        let with = |client: &str, redirect: &str| {
            format!(
                "response_type=code&client_id={client}&redirect_uri={}&code_challenge=abc",
                urlencoding::encode(redirect)
            )
        };

        assert_invalid_request(
            provider.parse_auth_request(&with("anything", "https://app.example/cb")),
        );
        assert_invalid_request(
            provider.parse_auth_request(&with("client-a", "https://evil.example/steal")),
        );
        assert_invalid_request(
            provider.parse_auth_request(&with("client-a", "https://app.example/cb/other")),
        );
        assert_invalid_request(
            provider.parse_auth_request(&with("client-a", "https://app.example/cb#frag")),
        );
        // 回环地址只放宽端口
        assert!(
            provider
                .parse_auth_request(&with("client-a", "http://127.0.0.1:53682/callback"))
                .is_ok()
        );
        assert_invalid_request(
            provider.parse_auth_request(&with("client-a", "http://127.0.0.1:53682/elsewhere")),
        );
    }

    #[tokio::test]
    async fn test_full_grant_exchange_and_resolve() {
        let (provider, _db) = provider().await;
        let pair = generate_challenge();
        let request = provider
            .parse_auth_request(&query(&pair.code_challenge))
            .unwrap();
        let context = AuthContext::new("user_01", "alice@example.com")
            .with_permissions(vec!["tools:read".to_string()]);

        let redirect = provider
            .complete_authorization(&request, &context)
            .await
            .unwrap();
        let params = code_from(&redirect);
        assert!(redirect.starts_with("https://app.example/cb?"));
        assert_eq!(params["state"], "xyz");

        let token = provider
            .exchange_code(&token_request(&params["code"], &pair.code_verifier))
            .await
            .unwrap();
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_in, 3600);
        assert_eq!(token.scope.as_deref(), Some("mcp profile"));

        let resolved = provider
            .resolve_access_token(&token.access_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.user_id, "user_01");
        assert!(resolved.has_permission("tools:read"));
        assert_eq!(resolved.auth_method(), AuthMethod::OAuth);
    }

    #[tokio::test]
    async fn test_code_is_single_use_even_after_failed_verifier() {
        let (provider, _db) = provider().await;
        let pair = generate_challenge();
        let request = provider
            .parse_auth_request(&query(&pair.code_challenge))
            .unwrap();
        let redirect = provider
            .complete_authorization(&request, &AuthContext::new("user_01", "alice@example.com"))
            .await
            .unwrap();
        let code = code_from(&redirect)["code"].clone();

        let wrong = generate_challenge();
        let first = provider
            .exchange_code(&token_request(&code, &wrong.code_verifier))
            .await;
        assert!(matches!(first, Err(TokenError::InvalidGrant(_))));

        let second = provider
            .exchange_code(&token_request(&code, &pair.code_verifier))
            .await;
        assert!(matches!(second, Err(TokenError::InvalidGrant(_))));
    }

    #[tokio::test]
    async fn test_client_binding_enforced() {
        let (provider, _db) = provider().await;
        let pair = generate_challenge();
        let request = provider
            .parse_auth_request(&query(&pair.code_challenge))
            .unwrap();
        let redirect = provider
            .complete_authorization(&request, &AuthContext::new("user_01", "alice@example.com"))
            .await
            .unwrap();

        let mut token_req = token_request(&code_from(&redirect)["code"], &pair.code_verifier);
        token_req.client_id = Some("client-b".to_string());
        assert!(matches!(
            provider.exchange_code(&token_req).await,
            Err(TokenError::InvalidGrant("client mismatch"))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_grant_type() {
        let (provider, _db) = provider().await;
        let request = TokenRequest {
            grant_type: "password".to_string(),
            ..TokenRequest::default()
        };
        assert!(matches!(
            provider.exchange_code(&request).await,
            Err(TokenError::UnsupportedGrantType)
        ));
    }

    #[tokio::test]
    async fn test_token_for_deleted_user_resolves_to_none() {
        let (provider, db) = provider().await;
        let pair = generate_challenge();
        let request = provider
            .parse_auth_request(&query(&pair.code_challenge))
            .unwrap();
        let redirect = provider
            .complete_authorization(&request, &AuthContext::new("user_01", "alice@example.com"))
            .await
            .unwrap();
        let token = provider
            .exchange_code(&token_request(&code_from(&redirect)["code"], &pair.code_verifier))
            .await
            .unwrap();

        SeaOrmUserDirectory::new(db)
            .soft_delete_user("user_01")
            .await
            .unwrap();
        assert!(
            provider
                .resolve_access_token(&token.access_token)
                .await
                .unwrap()
                .is_none()
        );
    }
}
