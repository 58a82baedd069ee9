//! # PKCE (Proof Key for Code Exchange) 安全机制
//!
//! 实现RFC 7636定义的PKCE扩展（仅 S256）。
//!
//! ## 核心原理
//! 1. 生成 32 字节随机数，base64url（无填充）编码为 Code Verifier
//! 2. `通过SHA256哈希生成Code Challenge`
//! 3. 授权请求时发送Code Challenge，Verifier 以 `state` 为键暂存
//! 4. 回调时一次性取出 Verifier 用于令牌交换

use base64::engine::{Engine, general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheKeyBuilder, CacheProvider, keys::PKCE_TTL};
use crate::error::Result;
use crate::{
    ldebug, lwarn,
    logging::{LogComponent, LogStage},
};

/// Verifier 随机字节数
const VERIFIER_BYTES: usize = 32;

/// RFC 7636 规定的 Code Verifier 长度范围
const MIN_CODE_VERIFIER_LENGTH: usize = 43;
const MAX_CODE_VERIFIER_LENGTH: usize = 128;

/// Code Challenge方法
pub const CHALLENGE_METHOD_S256: &str = "S256";

/// PKCE参数对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub code_verifier: String,
    pub code_challenge: String,
}

impl PkcePair {
    /// 获取用于授权请求的参数
    #[must_use]
    pub fn authorization_params(&self) -> [(&'static str, &str); 2] {
        [
            ("code_challenge", self.code_challenge.as_str()),
            ("code_challenge_method", CHALLENGE_METHOD_S256),
        ]
    }
}

/// 生成新的 verifier / challenge 对
#[must_use]
pub fn generate_challenge() -> PkcePair {
    let mut bytes = [0u8; VERIFIER_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let code_verifier = URL_SAFE_NO_PAD.encode(bytes);
    let code_challenge = challenge_for(&code_verifier);
    PkcePair {
        code_verifier,
        code_challenge,
    }
}

/// 计算 S256 challenge
#[must_use]
pub fn challenge_for(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// 检查Code Verifier是否符合规范：长度 43-128，字符集 `[A-Za-z0-9-._~]`
#[must_use]
pub fn is_valid_code_verifier(code_verifier: &str) -> bool {
    (MIN_CODE_VERIFIER_LENGTH..=MAX_CODE_VERIFIER_LENGTH).contains(&code_verifier.len())
        && code_verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

/// 验证`Code Verifier`和 S256 `Code Challenge`是否匹配
#[must_use]
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    is_valid_code_verifier(code_verifier) && challenge_for(code_verifier) == code_challenge
}

/// PKCE verifier 的一次性存取
#[derive(Clone)]
pub struct PkceManager {
    cache: Arc<dyn CacheProvider>,
    ttl: Duration,
}

impl PkceManager {
    #[must_use]
    pub fn new(cache: Arc<dyn CacheProvider>) -> Self {
        Self {
            cache,
            ttl: PKCE_TTL,
        }
    }

    /// 指定 TTL（测试用短 TTL）
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// 生成新的 verifier / challenge 对
    #[must_use]
    pub fn generate_challenge(&self) -> PkcePair {
        generate_challenge()
    }

    /// 以 `state` 为键保存 verifier，覆盖同键旧值
    pub async fn store_verifier(&self, state: &str, code_verifier: &str) -> Result<()> {
        let key = CacheKeyBuilder::pkce(state).build();
        self.cache.set(&key, code_verifier, self.ttl).await?;

        ldebug!(
            "system",
            LogStage::Authorization,
            LogComponent::Pkce,
            "store_verifier",
            "PKCE verifier 已保存",
            ttl_secs = self.ttl.as_secs()
        );
        Ok(())
    }

    /// 取出并删除 verifier；不存在或已过期返回 `None`
    pub async fn consume_verifier(&self, state: &str) -> Result<Option<String>> {
        let key = CacheKeyBuilder::pkce(state).build();
        let verifier = self.cache.take(&key).await?;

        if verifier.is_none() {
            lwarn!(
                "system",
                LogStage::Callback,
                LogComponent::Pkce,
                "consume_verifier",
                "PKCE verifier 不存在、已过期或已被使用"
            );
        }
        Ok(verifier)
    }
}
