//! # SSO 会话存储与校验
//!
//! 会话记录以 `workos_session:{token}` 保存在键值存储中。`expires_at` 决定会话是否有效；
//! 存储 TTL 是独立的 30 天滑动窗口，每次校验成功时重置。
//!
//! 过期且带刷新令牌的会话会向身份提供商刷新。同一令牌的刷新是单飞的：
//! 进程内每个令牌一把异步锁，跨进程用 `SET NX` 锁键。

use async_trait::async_trait;
use base64::engine::{Engine, general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::identity_provider::IdentityProvider;
use crate::cache::keys::{REFRESH_LOCK_TTL, SESSION_TTL};
use crate::cache::{CacheKeyBuilder, CacheProvider, CacheProviderExt};
use crate::config::SessionConfig;
use crate::error::{Result, SessionInvalidReason};
use crate::{
    ldebug, linfo, lwarn,
    logging::{LogComponent, LogStage},
};

/// 刷新锁轮询间隔
const REFRESH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// SSO 会话记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_token: String,
    pub user_id: String,
    pub email: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_accessed_at: DateTime<Utc>,
}

impl Session {
    /// 新建会话，令牌随机生成
    #[must_use]
    pub fn new(
        user_id: &str,
        email: &str,
        refresh_token: Option<String>,
        now: DateTime<Utc>,
        lifetime: Duration,
    ) -> Self {
        Self {
            session_token: generate_session_token(),
            user_id: user_id.to_string(),
            email: email.to_string(),
            expires_at: now + to_chrono(lifetime),
            refresh_token,
            created_at: now,
            last_accessed_at: now,
        }
    }

    /// `expires_at` 严格早于 `now` 才算过期
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// 32 字节随机数，base64url 编码
#[must_use]
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

/// 会话存储
///
/// 存储或传输失败返回 `Err`；记录不存在返回 `Ok(None)`。
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, token: &str) -> Result<Option<Session>>;

    /// 写入记录并把存储 TTL 重置为 `ttl`
    async fn put(&self, session: &Session, ttl: Duration) -> Result<()>;

    async fn delete(&self, token: &str) -> Result<bool>;

    /// 尝试获取跨进程刷新锁
    async fn try_lock_refresh(&self, token: &str, ttl: Duration) -> Result<bool>;

    async fn release_refresh_lock(&self, token: &str) -> Result<()>;
}

/// 基于键值存储的会话存储
#[derive(Clone)]
pub struct CacheSessionStore {
    cache: Arc<dyn CacheProvider>,
}

impl CacheSessionStore {
    #[must_use]
    pub fn new(cache: Arc<dyn CacheProvider>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl SessionStore for CacheSessionStore {
    async fn get(&self, token: &str) -> Result<Option<Session>> {
        self.cache
            .get_json(&CacheKeyBuilder::session(token).build())
            .await
    }

    async fn put(&self, session: &Session, ttl: Duration) -> Result<()> {
        self.cache
            .set_json(
                &CacheKeyBuilder::session(&session.session_token).build(),
                session,
                ttl,
            )
            .await
    }

    async fn delete(&self, token: &str) -> Result<bool> {
        self.cache
            .delete(&CacheKeyBuilder::session(token).build())
            .await
    }

    async fn try_lock_refresh(&self, token: &str, ttl: Duration) -> Result<bool> {
        self.cache
            .set_nx(
                &CacheKeyBuilder::session_refresh_lock(token).build(),
                "1",
                ttl,
            )
            .await
    }

    async fn release_refresh_lock(&self, token: &str) -> Result<()> {
        self.cache
            .delete(&CacheKeyBuilder::session_refresh_lock(token).build())
            .await
            .map(|_| ())
    }
}

/// 会话校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionValidation {
    Valid(Session),
    Invalid(SessionInvalidReason),
}

impl SessionValidation {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    #[must_use]
    pub fn into_session(self) -> Option<Session> {
        match self {
            Self::Valid(session) => Some(session),
            Self::Invalid(_) => None,
        }
    }
}

/// 会话时长设置
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// 存储滑动 TTL，也是刷新后会话的有效期
    pub ttl: Duration,
    /// 跨进程刷新锁 TTL
    pub refresh_lock_ttl: Duration,
    /// 未抢到刷新锁时的最长等待
    pub refresh_wait: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl: SESSION_TTL,
            refresh_lock_ttl: REFRESH_LOCK_TTL,
            refresh_wait: Duration::from_millis(1_500),
        }
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_seconds),
            refresh_lock_ttl: Duration::from_secs(config.refresh_lock_ttl_seconds),
            refresh_wait: Duration::from_millis(config.refresh_wait_ms),
        }
    }
}

/// 会话校验器
pub struct SessionValidator {
    store: Arc<dyn SessionStore>,
    identity: Arc<dyn IdentityProvider>,
    settings: SessionSettings,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionValidator {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        identity: Arc<dyn IdentityProvider>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            identity,
            settings,
            refresh_locks: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// 为新登录的用户创建并保存会话
    pub async fn create_session(
        &self,
        user_id: &str,
        email: &str,
        refresh_token: Option<String>,
    ) -> Result<Session> {
        let session = Session::new(user_id, email, refresh_token, Utc::now(), self.settings.ttl);
        self.store.put(&session, self.settings.ttl).await?;

        linfo!(
            "system",
            LogStage::Session,
            LogComponent::Session,
            "create_session",
            "SSO 会话已创建",
            user_id = %session.user_id
        );
        Ok(session)
    }

    /// 删除会话（登出）
    pub async fn revoke(&self, token: &str) -> Result<bool> {
        self.store.delete(token).await
    }

    /// 以当前时间校验
    pub async fn validate(&self, token: &str) -> Result<SessionValidation> {
        self.validate_at(token, Utc::now()).await
    }

    /// 校验会话
    ///
    /// 存储读取失败返回 `Err`。刷新失败时存储中的记录保持原样。
    pub async fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<SessionValidation> {
        let Some(session) = self.store.get(token).await? else {
            return Ok(SessionValidation::Invalid(SessionInvalidReason::NoSession));
        };

        if !session.is_expired_at(now) {
            return Ok(SessionValidation::Valid(self.touch(session, now).await));
        }

        if session.refresh_token.is_none() {
            ldebug!(
                "system",
                LogStage::Session,
                LogComponent::Session,
                "validate",
                "会话已过期且没有刷新令牌",
                user_id = %session.user_id
            );
            return Ok(SessionValidation::Invalid(SessionInvalidReason::Expired));
        }

        self.refresh_single_flight(token, now).await
    }

    /// 更新最后访问时间并重置存储 TTL；写入失败只记录日志
    async fn touch(&self, mut session: Session, now: DateTime<Utc>) -> Session {
        session.last_accessed_at = now;
        if let Err(e) = self.store.put(&session, self.settings.ttl).await {
            lwarn!(
                "system",
                LogStage::Session,
                LogComponent::Session,
                "touch_failed",
                &format!("更新会话访问时间失败: {e}"),
                user_id = %session.user_id
            );
        }
        session
    }

    async fn refresh_single_flight(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionValidation> {
        let lock = self
            .refresh_locks
            .entry(token.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.refresh_locked(token, now).await
        };

        drop(lock);
        self.refresh_locks
            .remove_if(token, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// 持有进程内锁时执行：先重读记录，再抢跨进程锁，最后才调用上游
    async fn refresh_locked(&self, token: &str, now: DateTime<Utc>) -> Result<SessionValidation> {
        let Some(current) = self.store.get(token).await? else {
            return Ok(SessionValidation::Invalid(SessionInvalidReason::NoSession));
        };
        if !current.is_expired_at(now) {
            // 另一个任务已经完成刷新
            return Ok(SessionValidation::Valid(self.touch(current, now).await));
        }
        let Some(refresh_token) = current.refresh_token.clone() else {
            return Ok(SessionValidation::Invalid(SessionInvalidReason::Expired));
        };

        let lock_acquired = match self
            .store
            .try_lock_refresh(token, self.settings.refresh_lock_ttl)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Session,
                    LogComponent::Session,
                    "refresh_lock_failed",
                    &format!("获取刷新锁失败，直接刷新: {e}")
                );
                false
            }
        };

        if !lock_acquired && let Some(refreshed) = self.wait_for_peer_refresh(token, now).await {
            return Ok(SessionValidation::Valid(self.touch(refreshed, now).await));
        }

        let outcome = self.refresh_upstream(current, &refresh_token, now).await;

        if lock_acquired && let Err(e) = self.store.release_refresh_lock(token).await {
            lwarn!(
                "system",
                LogStage::Session,
                LogComponent::Session,
                "refresh_unlock_failed",
                &format!("释放刷新锁失败: {e}")
            );
        }
        outcome
    }

    /// 其他节点持有刷新锁时，在等待窗口内轮询记录
    async fn wait_for_peer_refresh(&self, token: &str, now: DateTime<Utc>) -> Option<Session> {
        let deadline = tokio::time::Instant::now() + self.settings.refresh_wait;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(REFRESH_POLL_INTERVAL).await;
            if let Ok(Some(session)) = self.store.get(token).await
                && !session.is_expired_at(now)
            {
                return Some(session);
            }
        }
        ldebug!(
            "system",
            LogStage::Session,
            LogComponent::Session,
            "refresh_wait_timeout",
            "等待其他节点刷新超时，自行刷新"
        );
        None
    }

    async fn refresh_upstream(
        &self,
        current: Session,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionValidation> {
        match self
            .identity
            .authenticate_with_refresh_token(refresh_token)
            .await
        {
            Ok(response) => {
                let refreshed = Session {
                    refresh_token: Some(response.refresh_token),
                    expires_at: now + to_chrono(self.settings.ttl),
                    last_accessed_at: now,
                    ..current
                };
                self.store.put(&refreshed, self.settings.ttl).await?;

                linfo!(
                    "system",
                    LogStage::Session,
                    LogComponent::Session,
                    "refresh_ok",
                    "会话刷新成功，刷新令牌已轮换",
                    user_id = %refreshed.user_id
                );
                Ok(SessionValidation::Valid(refreshed))
            }
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Session,
                    LogComponent::Session,
                    "refresh_failed",
                    &format!("会话刷新失败: {e}"),
                    user_id = %current.user_id
                );
                Ok(SessionValidation::Invalid(
                    SessionInvalidReason::RefreshFailed,
                ))
            }
        }
    }
}
