//! 会话刷新并发测试：同一令牌的并发校验只触发一次上游刷新

use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use mcp_sso_auth::auth::session::{
    CacheSessionStore, Session, SessionSettings, SessionStore, SessionValidation,
    SessionValidator,
};
use mcp_sso_auth::cache::{CacheProvider, MemoryCache};
use mcp_sso_auth::error::SessionInvalidReason;
use mcp_sso_auth::testing::{FakeIdentityProvider, init_test_env};

struct Fixture {
    validator: Arc<SessionValidator>,
    store: Arc<CacheSessionStore>,
    identity: Arc<FakeIdentityProvider>,
}

fn fixture(identity: FakeIdentityProvider) -> Fixture {
    init_test_env();
    let cache: Arc<dyn CacheProvider> = Arc::new(MemoryCache::new());
    let store = Arc::new(CacheSessionStore::new(cache));
    let identity = Arc::new(identity);
    let validator = Arc::new(SessionValidator::new(
        store.clone(),
        identity.clone(),
        SessionSettings::default(),
    ));
    Fixture {
        validator,
        store,
        identity,
    }
}

async fn expired_session(store: &CacheSessionStore, refresh_token: Option<&str>) -> Session {
    let created = Utc::now() - ChronoDuration::days(31);
    let session = Session::new(
        "user_01",
        "alice@example.com",
        refresh_token.map(ToString::to_string),
        created,
        Duration::from_secs(30 * 24 * 3600),
    );
    store
        .put(&session, Duration::from_secs(3600))
        .await
        .unwrap();
    session
}

#[tokio::test]
async fn concurrent_validations_share_one_refresh() {
    let f = fixture(
        FakeIdentityProvider::new("user_01", "alice@example.com")
            .with_delay(Duration::from_millis(50)),
    );
    let session = expired_session(&f.store, Some("refresh-0")).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let validator = Arc::clone(&f.validator);
        let token = session.session_token.clone();
        handles.push(tokio::spawn(async move { validator.validate(&token).await }));
    }

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        let refreshed = result.into_session().expect("valid after refresh");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
        assert!(refreshed.expires_at > Utc::now());
    }
    assert_eq!(f.identity.refresh_calls(), 1);
}

#[tokio::test]
async fn failed_refresh_keeps_stale_record() {
    let f = fixture(FakeIdentityProvider::new("user_01", "alice@example.com"));
    f.identity.fail_refresh(true);
    let session = expired_session(&f.store, Some("refresh-0")).await;

    let result = f.validator.validate(&session.session_token).await.unwrap();
    assert!(matches!(
        result,
        SessionValidation::Invalid(SessionInvalidReason::RefreshFailed)
    ));

    let stored = f.store.get(&session.session_token).await.unwrap().unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-0"));

    // 上游恢复后同一会话可以再次刷新
    f.identity.fail_refresh(false);
    let result = f.validator.validate(&session.session_token).await.unwrap();
    assert!(result.is_valid());
    assert_eq!(f.identity.refresh_calls(), 2);
}

#[tokio::test]
async fn expired_without_refresh_token_never_calls_upstream() {
    let f = fixture(FakeIdentityProvider::new("user_01", "alice@example.com"));
    let session = expired_session(&f.store, None).await;

    let result = f.validator.validate(&session.session_token).await.unwrap();
    assert!(matches!(
        result,
        SessionValidation::Invalid(SessionInvalidReason::Expired)
    ));
    assert_eq!(f.identity.refresh_calls(), 0);
}
