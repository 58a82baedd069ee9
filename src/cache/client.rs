//! # Redis 缓存客户端
//!
//! 提供 Redis 连接管理和基础操作

use crate::{
    ldebug, linfo, lerror,
    logging::{LogComponent, LogStage},
};
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Redis 缓存客户端
#[derive(Clone)]
pub struct CacheClient {
    /// Redis 连接管理器
    connection_manager: ConnectionManager,
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl CacheClient {
    /// 创建新的缓存客户端
    pub async fn new(redis_url: &str) -> Result<Self> {
        linfo!(
            "system",
            LogStage::Cache,
            LogComponent::Cache,
            "connect_to_redis",
            "正在连接 Redis 服务器"
        );

        let client = Client::open(redis_url)
            .map_err(|e| GatewayError::cache_with_source("创建 Redis 客户端失败", e))?;

        let connection_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| GatewayError::cache_with_source("建立 Redis 连接失败", e))?;

        linfo!(
            "system",
            LogStage::Cache,
            LogComponent::Cache,
            "redis_connected",
            "Redis 连接建立成功"
        );

        Ok(Self { connection_manager })
    }

    /// 设置缓存值并指定 TTL（毫秒精度）
    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::Cache,
            "set_cache",
            &format!("设置缓存: namespace={}, ttl={}ms", namespace(key), millis(ttl))
        );

        let mut conn = self.connection_manager.clone();
        conn.pset_ex::<_, _, ()>(key, value, millis(ttl))
            .await
            .map_err(|e| GatewayError::cache_with_source(format!("设置缓存失败: {}", namespace(key)), e))?;
        Ok(())
    }

    /// 获取缓存值
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection_manager.clone();
        let result: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| GatewayError::cache_with_source(format!("获取缓存失败: {}", namespace(key)), e))?;

        ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::Cache,
            "get_cache",
            &format!("namespace={}, hit={}", namespace(key), result.is_some())
        );
        Ok(result)
    }

    /// 原子地读取并删除（`GETDEL`）
    pub async fn get_del(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection_manager.clone();
        let result: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::cache_with_source(format!("GETDEL 失败: {}", namespace(key)), e))?;

        ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::Cache,
            "take_cache",
            &format!("namespace={}, hit={}", namespace(key), result.is_some())
        );
        Ok(result)
    }

    /// 仅当键不存在时写入（`SET NX PX`），返回是否写入成功
    pub async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::cache_with_source(format!("SET NX 失败: {}", namespace(key)), e))?;
        Ok(reply.is_some())
    }

    /// 删除缓存
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let deleted_count: i32 = conn
            .del(key)
            .await
            .map_err(|e| GatewayError::cache_with_source(format!("删除缓存失败: {}", namespace(key)), e))?;
        Ok(deleted_count > 0)
    }

    /// 测试连接
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::cache_with_source("Redis ping 失败", e))?;

        if response == "PONG" {
            Ok(())
        } else {
            lerror!(
                "system",
                LogStage::Cache,
                LogComponent::Cache,
                "ping_fail",
                &format!("Redis ping 响应异常: {response}")
            );
            Err(GatewayError::cache("Redis 连接测试失败"))
        }
    }
}

/// 日志里只记录键的命名空间，键本身可能是令牌
fn namespace(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}
