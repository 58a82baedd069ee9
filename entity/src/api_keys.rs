//! # API 密钥实体定义
//!
//! 长期有效的 Bearer 凭据。只保存密钥的哈希和展示前缀，明文从不落库；
//! 撤销为软删除（`is_active = false`），保留审计历史。

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// API 密钥实体
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    /// 完整明文密钥的 SHA-256（十六进制）
    #[sea_orm(unique)]
    #[serde(skip_serializing)]
    pub key_hash: String,
    /// 明文前 16 个字符，仅用于展示
    pub key_prefix: String,
    pub name: String,
    pub created_at: DateTimeUtc,
    pub expires_at: Option<DateTimeUtc>,
    pub last_used_at: Option<DateTimeUtc>,
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// 检查密钥是否已过期
    #[must_use]
    pub fn is_expired_at(&self, now: DateTimeUtc) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}
