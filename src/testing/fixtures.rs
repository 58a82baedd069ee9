//! # 测试数据 Fixtures
//!
//! 提供测试用的数据结构和预设数据

use chrono::{DateTime, Utc};
use entity::users;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, Set};

use crate::auth::identity_provider::{AuthenticationResponse, IdentityUser};

/// 用户测试数据构建器
pub struct UserFixture {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Default for UserFixture {
    fn default() -> Self {
        Self {
            id: "user_01".to_string(),
            email: "alice@example.com".to_string(),
            name: Some("Alice".to_string()),
            deleted_at: None,
        }
    }
}

impl UserFixture {
    /// 创建新的用户 fixture
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    #[must_use]
    pub fn email(mut self, email: &str) -> Self {
        self.email = email.to_string();
        self
    }

    /// 设置为已软删除
    #[must_use]
    pub fn deleted(mut self) -> Self {
        self.deleted_at = Some(Utc::now());
        self
    }

    /// 构建未落库的模型
    #[must_use]
    pub fn build(&self) -> users::Model {
        let now = Utc::now();
        users::Model {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            is_deleted: self.deleted_at.is_some(),
            deleted_at: self.deleted_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// 写入数据库
    pub async fn insert(&self, db: &DatabaseConnection) -> Result<users::Model, DbErr> {
        let model = self.build();
        users::ActiveModel {
            id: Set(model.id),
            email: Set(model.email),
            name: Set(model.name),
            is_deleted: Set(model.is_deleted),
            deleted_at: Set(model.deleted_at),
            created_at: Set(model.created_at),
            updated_at: Set(model.updated_at),
        }
        .insert(db)
        .await
    }
}

/// 构建上游认证响应
#[must_use]
pub fn authentication_response(
    user_id: &str,
    email: &str,
    access_token: &str,
    refresh_token: &str,
) -> AuthenticationResponse {
    AuthenticationResponse {
        user: IdentityUser {
            id: user_id.to_string(),
            email: email.to_string(),
            first_name: None,
            last_name: None,
        },
        access_token: access_token.to_string(),
        refresh_token: refresh_token.to_string(),
        organization_id: None,
    }
}
