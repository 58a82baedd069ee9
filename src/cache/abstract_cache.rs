//! # 缓存抽象层
//!
//! 提供统一的键值存储接口，支持内存缓存和Redis缓存。值统一为字符串，
//! 结构化数据通过 [`CacheProviderExt`] 以 JSON 形式读写。

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::client::CacheClient;
use crate::config::{CacheConfig, CacheType};
use crate::error::{GatewayError, Result};
use crate::{
    linfo,
    logging::{LogComponent, LogStage},
};

/// 缓存项
#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// 按条目自身的过期时间淘汰，覆盖写入时重新计时
struct EntryExpiry;

impl moka::Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        created_at: Instant,
    ) -> Option<Duration> {
        Some(value.expires_at.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.expires_at.saturating_duration_since(updated_at))
    }
}

/// 缓存抽象trait
///
/// 存储或传输失败返回 `Err`；键不存在或已过期返回 `Ok(None)`。
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// 设置缓存值（覆盖已有值）
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// 获取缓存值
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// 原子地读取并删除
    async fn take(&self, key: &str) -> Result<Option<String>>;

    /// 仅当键不存在时写入，返回是否写入
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// 删除缓存值，返回键是否存在
    async fn delete(&self, key: &str) -> Result<bool>;

    /// 后端名称
    fn backend(&self) -> &'static str;
}

/// JSON 读写辅助方法
#[async_trait]
pub trait CacheProviderExt: CacheProvider {
    /// 以 JSON 写入
    async fn set_json<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let serialized = serde_json::to_string(value)
            .map_err(|e| GatewayError::cache_with_source("序列化缓存值失败", e))?;
        self.set(key, &serialized, ttl).await
    }

    /// 以 JSON 读取
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.get(key).await?.map(|raw| decode(&raw)).transpose()
    }

    /// 以 JSON 原子读取并删除
    async fn take_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.take(key).await?.map(|raw| decode(&raw)).transpose()
    }
}

impl<C: CacheProvider + ?Sized> CacheProviderExt for C {}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| GatewayError::cache_with_source("反序列化缓存值失败", e))
}

/// 内存缓存实现
///
/// 过期条目由 `moka` 后台维护淘汰，读取路径另外按 `expires_at` 过滤，
/// 保证淘汰尚未执行时也看不到过期值。
pub struct MemoryCache {
    entries: Cache<String, CacheEntry>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().expire_after(EntryExpiry).build(),
        }
    }

    /// 立即执行挂起的淘汰任务
    pub async fn cleanup_expired(&self) {
        self.entries.run_pending_tasks().await;
    }

    /// 淘汰过期项后的条目数
    pub async fn len(&self) -> u64 {
        self.cleanup_expired().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheProvider for MemoryCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), CacheEntry::new(value.to_string(), ttl))
            .await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .get(key)
            .await
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value))
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        // remove 对同一键是原子的，只有一个调用者能拿到值
        Ok(self
            .entries
            .remove(key)
            .await
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value))
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(async { CacheEntry::new(value.to_string(), ttl) })
            .await;
        Ok(entry.is_fresh())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .remove(key)
            .await
            .is_some_and(|entry| !entry.is_expired()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Redis缓存实现
pub struct RedisCache {
    client: CacheClient,
}

impl RedisCache {
    /// 连接 Redis
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = CacheClient::new(redis_url).await?;
        client.ping().await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CacheProvider for RedisCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.client.set_with_ttl(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.client.get(key).await
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        self.client.get_del(key).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.client.set_nx(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.client.delete(key).await
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// 根据配置创建缓存后端
pub async fn create_cache_provider(config: &CacheConfig) -> Result<Arc<dyn CacheProvider>> {
    let provider: Arc<dyn CacheProvider> = match config.cache_type {
        CacheType::Memory => {
            linfo!(
                "system",
                LogStage::Startup,
                LogComponent::Cache,
                "cache_backend",
                "使用内存缓存"
            );
            Arc::new(MemoryCache::new())
        }
        CacheType::Redis => {
            let redis = config
                .redis
                .as_ref()
                .ok_or_else(|| GatewayError::config("缺少 cache.redis 配置"))?;
            linfo!(
                "system",
                LogStage::Startup,
                LogComponent::Cache,
                "cache_backend",
                "使用Redis缓存"
            );
            Arc::new(RedisCache::connect(&redis.url).await?)
        }
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        user_id: String,
    }

    #[tokio::test]
    async fn test_take_is_one_time() {
        let cache = MemoryCache::new();
        cache.set("pkce:s1", "verifier", Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.take("pkce:s1").await.unwrap().as_deref(), Some("verifier"));
        assert_eq!(cache.take("pkce:s1").await.unwrap(), None);
        assert_eq!(cache.get("pkce:s1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.take("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_nx_respects_live_and_expired_entries() {
        let cache = MemoryCache::new();
        assert!(cache.set_nx("lock", "a", Duration::from_millis(20)).await.unwrap());
        assert!(!cache.set_nx("lock", "b", Duration::from_millis(20)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.set_nx("lock", "c", Duration::from_secs(1)).await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap().as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_expired_entries_are_evicted_without_reads() {
        let cache = MemoryCache::new();
        for i in 0..1000 {
            cache
                .set(&format!("pkce:{i}"), "v", Duration::from_millis(5))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        for i in 0..10 {
            cache
                .set(&format!("oauth_grant:{i}"), "g", Duration::from_secs(60))
                .await
                .unwrap();
        }

        assert_eq!(cache.len().await, 10);
    }

    #[tokio::test]
    async fn test_overwrite_resets_ttl() {
        let cache = MemoryCache::new();
        cache.set("k", "old", Duration::from_millis(20)).await.unwrap();
        cache.set("k", "new", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_concurrent_take_single_winner() {
        let cache = Arc::new(MemoryCache::new());
        cache.set("oauth_grant:c", "grant", Duration::from_secs(60)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.take("oauth_grant:c").await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_json_helpers_through_trait_object() {
        let cache: Arc<dyn CacheProvider> = Arc::new(MemoryCache::new());
        let payload = Payload {
            user_id: "user_1".to_string(),
        };
        cache.set_json("k", &payload, Duration::from_secs(60)).await.unwrap();

        let loaded: Option<Payload> = cache.get_json("k").await.unwrap();
        assert_eq!(loaded, Some(payload));
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
    }
}
