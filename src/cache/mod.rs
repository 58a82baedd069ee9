//! # 缓存模块
//!
//! 键值存储抽象（内存 / Redis）、Redis 客户端和缓存键规范

pub mod abstract_cache;
pub mod client;
pub mod keys;

pub use abstract_cache::{
    CacheProvider, CacheProviderExt, MemoryCache, RedisCache, create_cache_provider,
};
pub use client::CacheClient;
pub use keys::{CacheKey, CacheKeyBuilder};
