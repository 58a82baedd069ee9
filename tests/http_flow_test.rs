//! HTTP 层端到端测试：授权流程、令牌兑换、`/mcp` 认证分发和密钥管理

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::Response;
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

use mcp_sso_auth::auth::pkce::generate_challenge;
use mcp_sso_auth::cache::MemoryCache;
use mcp_sso_auth::config::{AppConfig, OAuthClientConfig};
use mcp_sso_auth::server::{AppServices, AppState, WhoAmIHandler, create_router};
use mcp_sso_auth::testing::{FakeIdentityProvider, UserFixture, create_test_db, init_test_env};

struct TestApp {
    router: Router,
    identity: Arc<FakeIdentityProvider>,
}

async fn app_with_identity(identity: FakeIdentityProvider) -> TestApp {
    init_test_env();
    let db = Arc::new(create_test_db().await.unwrap());
    UserFixture::new().insert(&db).await.unwrap();

    let mut config = AppConfig::default();
    config.server.public_url = "https://mcp.example.com".to_string();
    config.workos.registration_url = "https://example.com/register".to_string();
    config.workos.cookie_domain = Some(".example.com".to_string());
    config.oauth.clients = vec![OAuthClientConfig::new("client-a", &["https://app.example/cb"])];

    let identity = Arc::new(identity);
    let services = AppServices::build(
        config,
        db,
        Arc::new(MemoryCache::new()),
        identity.clone(),
        Arc::new(WhoAmIHandler),
    );
    TestApp {
        router: create_router(AppState::new(services)),
        identity,
    }
}

async fn app() -> TestApp {
    app_with_identity(FakeIdentityProvider::new("idp_user_01", "alice@example.com")).await
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, format!("workos_session={cookie}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn mcp(&self, bearer: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(
            builder
                .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"whoami"}"#))
                .unwrap(),
        )
        .await
    }

    /// 走完直连身份提供商的流程，返回 (成功页, 会话令牌)
    async fn sign_in(&self) -> (String, String) {
        let pair = generate_challenge();
        let response = self.get(&authorize_uri(&pair.code_challenge), None).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let state = query_params(location(&response))["state"].clone();

        let response = self
            .get(
                &format!("/callback?code=idp-code&state={}", urlencoding::encode(&state)),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let session = session_cookie(response.headers()).expect("session cookie");
        let page = body_text(response).await;
        (page, session)
    }
}

fn authorize_uri(challenge: &str) -> String {
    format!(
        "/authorize?response_type=code&client_id=client-a&redirect_uri=https%3A%2F%2Fapp.example%2Fcb&state=client-state&code_challenge={challenge}&code_challenge_method=S256"
    )
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap()
}

fn query_params(url: &str) -> HashMap<String, String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect()
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(mcp_sso_auth::auth::cookie::parse_session_cookie)
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// 从成功页里取出授权码
fn code_from_page(page: &str) -> String {
    let start = page.find("code=").unwrap() + "code=".len();
    page[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

#[tokio::test]
async fn health_reports_backends() {
    let app = app().await;
    let response = app.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache"], "memory");
}

#[tokio::test]
async fn mcp_without_credentials_is_unauthorized() {
    let app = app().await;
    let response = app.mcp(None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
}

#[tokio::test]
async fn malformed_api_key_gets_uniform_rejection() {
    let app = app().await;
    let response = app.mcp(Some("mcp_sk_not-a-real-key")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "INVALID_API_KEY");
}

#[tokio::test]
async fn authorize_without_client_id_is_bad_request() {
    let app = app().await;
    let response = app.get("/authorize?response_type=code", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn full_oauth_flow_reaches_mcp() {
    let app = app().await;
    let (page, session) = app.sign_in().await;
    assert!(page.contains("https://app.example/cb?code="));
    assert_eq!(app.identity.code_calls(), 1);

    // sign_in 内部的 verifier 拿不到；用已知 verifier 经 SSO 快捷路径再授权一次
    let pair = generate_challenge();
    let response = app
        .get(&authorize_uri(&pair.code_challenge), Some(&session))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let code = code_from_page(&body_text(response).await);

    let form = format!(
        "grant_type=authorization_code&code={code}&code_verifier={}&client_id=client-a&redirect_uri=https%3A%2F%2Fapp.example%2Fcb",
        pair.code_verifier
    );
    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form.clone()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let token = body_json(response).await;
    let access_token = token["access_token"].as_str().unwrap().to_string();
    assert_eq!(token["token_type"], "Bearer");

    let response = app.mcp(Some(&access_token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let reply = body_json(response).await;
    assert_eq!(reply["result"]["user_id"], "user_01");
    assert_eq!(reply["result"]["auth_method"], "oauth");

    // 授权码只能兑换一次
    let replay = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await;
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(replay).await["error"], "invalid_grant");
}

#[tokio::test]
async fn sso_shortcut_skips_identity_provider() {
    let app = app().await;
    let (_, session) = app.sign_in().await;

    let pair = generate_challenge();
    let response = app
        .get(&authorize_uri(&pair.code_challenge), Some(&session))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("https://app.example/cb?code="));
    assert_eq!(app.identity.code_calls(), 1);
}

#[tokio::test]
async fn live_session_cannot_redirect_to_unregistered_uri() {
    let app = app().await;
    let (_, session) = app.sign_in().await;

    let attacker = generate_challenge();
    let uri = format!(
        "/authorize?response_type=code&client_id=client-a&redirect_uri=https%3A%2F%2Fevil.example%2Fsteal&code_challenge={}",
        attacker.code_challenge
    );
    let response = app.get(&uri, Some(&session)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!body_text(response).await.contains("code="));
}

#[tokio::test]
async fn callback_replay_reports_missing_verifier() {
    let app = app().await;
    let pair = generate_challenge();
    let response = app.get(&authorize_uri(&pair.code_challenge), None).await;
    let state = query_params(location(&response))["state"].clone();
    let uri = format!("/callback?code=c&state={}", urlencoding::encode(&state));

    assert_eq!(app.get(&uri, None).await.status(), StatusCode::OK);
    let replay = app.get(&uri, None).await;
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(replay).await["error"]["code"], "MISSING_VERIFIER");
}

#[tokio::test]
async fn unknown_user_sees_registration_page() {
    let app =
        app_with_identity(FakeIdentityProvider::new("idp_new", "newcomer@example.com")).await;
    let pair = generate_challenge();
    let response = app.get(&authorize_uri(&pair.code_challenge), None).await;
    let state = query_params(location(&response))["state"].clone();

    let response = app
        .get(
            &format!("/callback?code=c&state={}", urlencoding::encode(&state)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let page = body_text(response).await;
    assert!(page.contains("https://example.com/register?returnTo="));
}

#[tokio::test]
async fn api_key_lifecycle_over_http() {
    let app = app().await;
    let (_, session) = app.sign_in().await;
    let cookie = format!("workos_session={session}");

    let unauthenticated = app.get("/api-keys", None).await;
    assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/api-keys")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name":"ci"}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let api_key = created["data"]["api_key"].as_str().unwrap().to_string();
    let key_id = created["data"]["id"].as_str().unwrap().to_string();
    assert!(api_key.starts_with("mcp_sk_"));

    let response = app.mcp(Some(&api_key)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["result"]["auth_method"], "api_key");

    let listed = body_json(app.get("/api-keys", Some(&session)).await).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    assert!(listed["data"][0].get("key_hash").is_none());

    let response = app
        .send(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api-keys/{key_id}"))
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.mcp(Some(&api_key)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_clears_session() {
    let app = app().await;
    let (_, session) = app.sign_in().await;

    let response = app.get("/logout", Some(&session)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cleared = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cleared.contains("Max-Age=0"));

    let pair = generate_challenge();
    let response = app
        .get(&authorize_uri(&pair.code_challenge), Some(&session))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).starts_with("https://idp.test/authorize"));
}
