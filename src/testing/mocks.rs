//! # 测试替身
//!
//! 单元测试里可直接用 `mockall` 生成的 `MockIdentityProvider`；这里的
//! [`FakeIdentityProvider`] 额外支持调用计数、人为延迟和刷新令牌轮换，
//! 并且集成测试也能使用。

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::fixtures::authentication_response;
use crate::auth::identity_provider::{AuthenticationResponse, IdentityProvider};
use crate::error::{GatewayError, Result};

/// 可编程的身份提供商
pub struct FakeIdentityProvider {
    user_id: String,
    email: String,
    access_token: Mutex<String>,
    delay: Duration,
    fail_code: AtomicBool,
    fail_refresh: AtomicBool,
    code_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    last_code_verifier: Mutex<Option<String>>,
}

impl FakeIdentityProvider {
    #[must_use]
    pub fn new(user_id: &str, email: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            email: email.to_string(),
            access_token: Mutex::new("opaque-access-token".to_string()),
            delay: Duration::ZERO,
            fail_code: AtomicBool::new(false),
            fail_refresh: AtomicBool::new(false),
            code_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            last_code_verifier: Mutex::new(None),
        }
    }

    /// 每次上游调用前等待
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 设置授权码交换返回的访问令牌
    #[must_use]
    pub fn with_access_token(self, access_token: &str) -> Self {
        if let Ok(mut guard) = self.access_token.lock() {
            *guard = access_token.to_string();
        }
        self
    }

    pub fn fail_code_exchange(&self, fail: bool) {
        self.fail_code.store(fail, Ordering::SeqCst);
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn code_calls(&self) -> usize {
        self.code_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// 最近一次授权码交换收到的 verifier
    #[must_use]
    pub fn last_code_verifier(&self) -> Option<String> {
        self.last_code_verifier.lock().ok().and_then(|v| v.clone())
    }

    fn access_token(&self) -> String {
        self.access_token
            .lock()
            .map(|token| token.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> Result<String> {
        Ok(format!(
            "https://idp.test/authorize?redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256",
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge)
        ))
    }

    async fn authenticate_with_code(
        &self,
        _code: &str,
        code_verifier: &str,
    ) -> Result<AuthenticationResponse> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_code_verifier.lock() {
            *last = Some(code_verifier.to_string());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_code.load(Ordering::SeqCst) {
            return Err(GatewayError::network("invalid_grant"));
        }
        Ok(authentication_response(
            &self.user_id,
            &self.email,
            &self.access_token(),
            "refresh-0",
        ))
    }

    async fn authenticate_with_refresh_token(
        &self,
        _refresh_token: &str,
    ) -> Result<AuthenticationResponse> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(GatewayError::network("invalid_grant"));
        }
        Ok(authentication_response(
            &self.user_id,
            &self.email,
            &self.access_token(),
            &format!("refresh-{call}"),
        ))
    }
}
