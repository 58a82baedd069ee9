//! # 实体定义测试
//!
//! 测试 Sea-ORM 实体定义的正确性

#[cfg(test)]
mod tests {
    use crate::{api_keys, users};
    use chrono::{Duration, Utc};
    use sea_orm::Set;

    #[tokio::test]
    async fn test_user_entity_creation() {
        let user = users::ActiveModel {
            id: Set("user_01".to_string()),
            email: Set("test@example.com".to_string()),
            is_deleted: Set(false),
            ..Default::default()
        };

        assert_eq!(user.id.as_ref(), "user_01");
        assert_eq!(user.email.as_ref(), "test@example.com");
        assert_eq!(user.is_deleted.as_ref(), &false);
    }

    #[test]
    fn test_api_key_expiry() {
        let now = Utc::now();
        let mut key = api_keys::Model {
            id: "key_1".to_string(),
            user_id: "user_01".to_string(),
            key_hash: "hash".to_string(),
            key_prefix: "mcp_sk_0123456789".to_string(),
            name: "ci".to_string(),
            created_at: now,
            expires_at: None,
            last_used_at: None,
            is_active: true,
        };

        // 未设置过期时间的密钥永不过期
        assert!(!key.is_expired_at(now));

        key.expires_at = Some(now - Duration::seconds(1));
        assert!(key.is_expired_at(now));

        key.expires_at = Some(now + Duration::days(1));
        assert!(!key.is_expired_at(now));
    }

    #[test]
    fn test_api_key_hash_not_serialized() {
        let now = Utc::now();
        let key = api_keys::Model {
            id: "key_1".to_string(),
            user_id: "user_01".to_string(),
            key_hash: "secret-hash".to_string(),
            key_prefix: "mcp_sk_0123456789".to_string(),
            name: "ci".to_string(),
            created_at: now,
            expires_at: None,
            last_used_at: None,
            is_active: true,
        };

        let json = serde_json::to_string(&key).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(json.contains("mcp_sk_0123456789"));
    }
}
