//! # 用户目录
//!
//! 会话和 API Key 最终都解析到一个 `user_id`，每次认证成功前都要确认该用户存在且未被软删除。

use async_trait::async_trait;
use chrono::Utc;
use entity::users;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;

use crate::error::Result;
use crate::{
    ldebug, linfo,
    logging::{LogComponent, LogStage},
};

/// 用户目录
///
/// 数据库故障返回 `Err`；用户不存在返回 `Ok(None)`。软删除的用户照常返回，由调用方判断。
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<users::Model>>;

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<users::Model>>;
}

/// 基于 Sea-ORM 的用户目录
#[derive(Clone)]
pub struct SeaOrmUserDirectory {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmUserDirectory {
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// 新建用户（命令行和测试夹具使用）
    pub async fn create_user(
        &self,
        user_id: &str,
        email: &str,
        name: Option<&str>,
    ) -> Result<users::Model> {
        let now = Utc::now();
        let user = users::ActiveModel {
            id: Set(user_id.to_string()),
            email: Set(normalize_email(email)),
            name: Set(name.map(ToString::to_string)),
            is_deleted: Set(false),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?;

        linfo!(
            "system",
            LogStage::Database,
            LogComponent::UserDirectory,
            "create_user",
            "用户已创建",
            user_id = %user.id
        );
        Ok(user)
    }

    /// 软删除用户
    pub async fn soft_delete_user(&self, user_id: &str) -> Result<bool> {
        let now = Utc::now();
        let result = users::Entity::update_many()
            .col_expr(users::Column::IsDeleted, Expr::value(true))
            .col_expr(users::Column::DeletedAt, Expr::value(Some(now)))
            .col_expr(users::Column::UpdatedAt, Expr::value(now))
            .filter(users::Column::Id.eq(user_id))
            .filter(users::Column::IsDeleted.eq(false))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }
}

/// 邮箱比较不区分大小写
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl UserDirectory for SeaOrmUserDirectory {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<users::Model>> {
        let user = users::Entity::find()
            .filter(users::Column::Email.eq(normalize_email(email)))
            .one(self.db.as_ref())
            .await?;

        ldebug!(
            "system",
            LogStage::Database,
            LogComponent::UserDirectory,
            "get_user_by_email",
            "按邮箱查询用户",
            found = user.is_some()
        );
        Ok(user)
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<users::Model>> {
        Ok(users::Entity::find_by_id(user_id.to_string())
            .one(self.db.as_ref())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::create_test_db;

    #[tokio::test]
    async fn test_lookup_by_email_is_case_insensitive() {
        let directory = SeaOrmUserDirectory::new(Arc::new(create_test_db().await.unwrap()));
        directory
            .create_user("user_01", "Alice@Example.com", Some("Alice"))
            .await
            .unwrap();

        let found = directory
            .get_user_by_email("alice@example.COM")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "user_01");
        assert!(found.is_active());
        assert!(directory.get_user_by_email("bob@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_soft_deleted_user_is_still_returned() {
        let directory = SeaOrmUserDirectory::new(Arc::new(create_test_db().await.unwrap()));
        directory.create_user("user_02", "b@example.com", None).await.unwrap();

        assert!(directory.soft_delete_user("user_02").await.unwrap());
        assert!(!directory.soft_delete_user("user_02").await.unwrap());

        let user = directory.get_user_by_id("user_02").await.unwrap().unwrap();
        assert!(user.is_deleted);
        assert!(user.deleted_at.is_some());
    }
}
