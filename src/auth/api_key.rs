//! # API Key 管理
//!
//! 为无法走交互式 OAuth 流程的客户端签发、校验、列出和吊销长期凭证。
//!
//! 密钥格式：`mcp_sk_` + 64 位小写十六进制（32 字节随机数）。
//! 只存储完整字面量的 SHA-256 和 16 字符展示前缀；密钥本身有 256 位熵，无需加盐。

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use entity::api_keys;
use rand::RngCore;
use rand::rngs::OsRng;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::types::{AUTH_METHOD_KEY, AuthContext, AuthMethod};
use super::user_directory::UserDirectory;
use crate::error::{AuthError, Result};
use crate::{
    ldebug, linfo, lwarn,
    logging::{LogComponent, LogStage},
};

/// 密钥字面量前缀
pub const API_KEY_PREFIX: &str = "mcp_sk_";
/// 随机字节数
const KEY_RANDOM_BYTES: usize = 32;
/// 完整长度：前缀 + 64 位十六进制
pub const API_KEY_LENGTH: usize = API_KEY_PREFIX.len() + KEY_RANDOM_BYTES * 2;
/// 展示前缀长度
pub const DISPLAY_PREFIX_LENGTH: usize = 16;
/// 名称最大长度
const MAX_NAME_LENGTH: usize = 100;
/// 有效期上限（天）
pub const MAX_EXPIRES_IN_DAYS: u32 = 3650;

/// 密钥哈希函数
pub trait KeyHasher: Send + Sync {
    fn hash(&self, api_key: &str) -> String;
}

/// SHA-256，小写十六进制
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256KeyHasher;

impl KeyHasher for Sha256KeyHasher {
    fn hash(&self, api_key: &str) -> String {
        hex::encode(Sha256::digest(api_key.as_bytes()))
    }
}

/// 计算过期时间；天数必须在 1 到上限之间
fn expiry_from(
    now: DateTime<Utc>,
    expires_in_days: Option<u32>,
) -> std::result::Result<Option<DateTime<Utc>>, AuthError> {
    let Some(days) = expires_in_days else {
        return Ok(None);
    };
    let invalid = || {
        AuthError::InvalidRequest(format!(
            "expires_in_days 必须为 1-{MAX_EXPIRES_IN_DAYS}"
        ))
    };
    if days == 0 || days > MAX_EXPIRES_IN_DAYS {
        return Err(invalid());
    }
    now.checked_add_signed(ChronoDuration::days(i64::from(days)))
        .map(Some)
        .ok_or_else(invalid)
}

/// 仅做结构检查：前缀、长度、十六进制主体
#[must_use]
pub fn is_valid_api_key_format(candidate: &str) -> bool {
    candidate.len() == API_KEY_LENGTH
        && candidate.strip_prefix(API_KEY_PREFIX).is_some_and(|body| {
            body.bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        })
}

/// Bearer 令牌是否带 API Key 前缀
#[must_use]
pub fn has_api_key_prefix(token: &str) -> bool {
    token.starts_with(API_KEY_PREFIX)
}

fn generate_key_literal() -> String {
    let mut bytes = [0u8; KEY_RANDOM_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{API_KEY_PREFIX}{}", hex::encode(bytes))
}

/// API Key 持久化
///
/// 数据库故障返回 `Err`；记录不存在返回 `Ok(None)`。
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert(&self, key: api_keys::Model) -> Result<api_keys::Model>;

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<api_keys::Model>>;

    async fn touch_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// 按创建时间倒序
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<api_keys::Model>>;

    /// 按 id 和所有者软吊销，返回是否有记录被修改
    async fn revoke(&self, id: &str, user_id: &str) -> Result<bool>;
}

/// 基于 Sea-ORM 的密钥存储
#[derive(Clone)]
pub struct SeaOrmApiKeyStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmApiKeyStore {
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ApiKeyStore for SeaOrmApiKeyStore {
    async fn insert(&self, key: api_keys::Model) -> Result<api_keys::Model> {
        let active = api_keys::ActiveModel {
            id: Set(key.id),
            user_id: Set(key.user_id),
            key_hash: Set(key.key_hash),
            key_prefix: Set(key.key_prefix),
            name: Set(key.name),
            created_at: Set(key.created_at),
            expires_at: Set(key.expires_at),
            last_used_at: Set(key.last_used_at),
            is_active: Set(key.is_active),
        };
        Ok(active.insert(self.db.as_ref()).await?)
    }

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<api_keys::Model>> {
        Ok(api_keys::Entity::find()
            .filter(api_keys::Column::KeyHash.eq(key_hash))
            .one(self.db.as_ref())
            .await?)
    }

    async fn touch_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        api_keys::Entity::update_many()
            .col_expr(api_keys::Column::LastUsedAt, Expr::value(Some(at)))
            .filter(api_keys::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<api_keys::Model>> {
        Ok(api_keys::Entity::find()
            .filter(api_keys::Column::UserId.eq(user_id))
            .order_by_desc(api_keys::Column::CreatedAt)
            .order_by_desc(api_keys::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    async fn revoke(&self, id: &str, user_id: &str) -> Result<bool> {
        let result = api_keys::Entity::update_many()
            .col_expr(api_keys::Column::IsActive, Expr::value(false))
            .filter(api_keys::Column::Id.eq(id))
            .filter(api_keys::Column::UserId.eq(user_id))
            .filter(api_keys::Column::IsActive.eq(true))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }
}

/// 新签发的密钥，`api_key` 是明文的唯一副本
#[derive(Debug, Clone, Serialize)]
pub struct IssuedApiKey {
    pub id: String,
    pub api_key: String,
    pub key_prefix: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// 可展示给所有者的密钥元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeySummary {
    pub id: String,
    pub name: String,
    pub key_prefix: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl From<api_keys::Model> for ApiKeySummary {
    fn from(model: api_keys::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            key_prefix: model.key_prefix,
            created_at: model.created_at,
            expires_at: model.expires_at,
            last_used_at: model.last_used_at,
            is_active: model.is_active,
        }
    }
}

/// API Key 管理器
#[derive(Clone)]
pub struct ApiKeyManager {
    store: Arc<dyn ApiKeyStore>,
    users: Arc<dyn UserDirectory>,
    hasher: Arc<dyn KeyHasher>,
}

impl ApiKeyManager {
    #[must_use]
    pub fn new(store: Arc<dyn ApiKeyStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self::with_hasher(store, users, Arc::new(Sha256KeyHasher))
    }

    #[must_use]
    pub fn with_hasher(
        store: Arc<dyn ApiKeyStore>,
        users: Arc<dyn UserDirectory>,
        hasher: Arc<dyn KeyHasher>,
    ) -> Self {
        Self {
            store,
            users,
            hasher,
        }
    }

    /// 签发新密钥，明文只返回这一次
    pub async fn generate(
        &self,
        user_id: &str,
        name: &str,
        expires_in_days: Option<u32>,
    ) -> Result<IssuedApiKey> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
            return Err(AuthError::InvalidRequest(format!(
                "密钥名称长度必须为 1-{MAX_NAME_LENGTH} 个字符"
            ))
            .into());
        }

        let now = Utc::now();
        let expires_at = expiry_from(now, expires_in_days)?;
        let api_key = generate_key_literal();
        let key_prefix = api_key[..DISPLAY_PREFIX_LENGTH].to_string();

        let stored = self
            .store
            .insert(api_keys::Model {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                key_hash: self.hasher.hash(&api_key),
                key_prefix: key_prefix.clone(),
                name: name.to_string(),
                created_at: now,
                expires_at,
                last_used_at: None,
                is_active: true,
            })
            .await?;

        linfo!(
            "system",
            LogStage::Authentication,
            LogComponent::ApiKey,
            "generate",
            "API Key 已签发",
            user_id = %user_id,
            key_prefix = %key_prefix
        );

        Ok(IssuedApiKey {
            id: stored.id,
            api_key,
            key_prefix,
            name: stored.name,
            created_at: stored.created_at,
            expires_at: stored.expires_at,
        })
    }

    /// 校验密钥，所有拒绝都是同一个 `ApiKeyInvalid`
    pub async fn validate(&self, candidate: &str) -> Result<AuthContext> {
        self.validate_at(candidate, Utc::now()).await
    }

    pub async fn validate_at(&self, candidate: &str, now: DateTime<Utc>) -> Result<AuthContext> {
        if !is_valid_api_key_format(candidate) {
            return Err(reject("malformed", None));
        }

        let key_hash = self.hasher.hash(candidate);
        let Some(key) = self.store.find_by_hash(&key_hash).await? else {
            return Err(reject("unknown", None));
        };
        if !key.is_active {
            return Err(reject("revoked", Some(&key.key_prefix)));
        }
        if key.is_expired_at(now) {
            return Err(reject("expired", Some(&key.key_prefix)));
        }

        let owner = self
            .users
            .get_user_by_id(&key.user_id)
            .await?
            .filter(entity::users::Model::is_active);
        let Some(owner) = owner else {
            return Err(reject("owner_unavailable", Some(&key.key_prefix)));
        };

        self.record_usage(key.id.clone(), now);

        ldebug!(
            "system",
            LogStage::Authentication,
            LogComponent::ApiKey,
            "validate",
            "API Key 校验通过",
            user_id = %owner.id,
            key_prefix = %key.key_prefix
        );

        Ok(AuthContext::new(owner.id, owner.email)
            .with_extra(AUTH_METHOD_KEY, AuthMethod::ApiKey.as_str())
            .with_extra("api_key_id", key.id)
            .with_extra("key_prefix", key.key_prefix))
    }

    /// 异步更新 `last_used_at`，不等待结果
    fn record_usage(&self, key_id: String, at: DateTime<Utc>) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.touch_last_used(&key_id, at).await {
                lwarn!(
                    "system",
                    LogStage::Database,
                    LogComponent::ApiKey,
                    "touch_last_used_failed",
                    &format!("记录 API Key 使用时间失败: {e}")
                );
            }
        });
    }

    /// 列出用户的密钥，最新在前
    pub async fn list(&self, user_id: &str) -> Result<Vec<ApiKeySummary>> {
        Ok(self
            .store
            .list_by_user(user_id)
            .await?
            .into_iter()
            .map(ApiKeySummary::from)
            .collect())
    }

    /// 吊销 `user_id` 名下的密钥
    pub async fn revoke(&self, id: &str, user_id: &str) -> Result<bool> {
        let revoked = self.store.revoke(id, user_id).await?;
        linfo!(
            "system",
            LogStage::Authentication,
            LogComponent::ApiKey,
            "revoke",
            "API Key 吊销请求",
            user_id = %user_id,
            revoked = revoked
        );
        Ok(revoked)
    }
}

fn reject(reason: &'static str, key_prefix: Option<&str>) -> crate::error::GatewayError {
    lwarn!(
        "system",
        LogStage::Authentication,
        LogComponent::ApiKey,
        "validate",
        "API Key 被拒绝",
        reason = reason,
        key_prefix = key_prefix.unwrap_or("-")
    );
    AuthError::ApiKeyInvalid.into()
}
