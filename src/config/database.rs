//! # 数据库配置

use crate::error::{GatewayError, Result};
use crate::{
    linfo,
    logging::{LogComponent, LogStage},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库URL
    pub url: String,
    /// 最大连接数
    pub max_connections: u32,
    /// 连接超时时间（秒）
    pub connect_timeout: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/auth.db?mode=rwc".to_string(),
            max_connections: 10,
            connect_timeout: 30,
        }
    }
}

impl DatabaseConfig {
    /// 确保数据库路径存在（仅对SQLite文件数据库）
    pub fn ensure_database_path(&self) -> Result<()> {
        if !self.is_sqlite() || self.is_memory_database() {
            return Ok(());
        }

        let path_str = self
            .url
            .strip_prefix("sqlite://")
            .unwrap_or(&self.url)
            .split('?')
            .next()
            .unwrap_or_default();
        let db_path = Path::new(path_str);

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                GatewayError::config_with_source(
                    format!("无法创建数据库目录: {}", parent.display()),
                    e,
                )
            })?;

            linfo!(
                "system",
                LogStage::Startup,
                LogComponent::Database,
                "create_db_dir",
                &format!("创建数据库目录: {}", parent.display())
            );
        }

        Ok(())
    }

    /// 获取准备好的数据库连接字符串
    pub fn get_connection_url(&self) -> Result<String> {
        self.ensure_database_path()?;
        Ok(self.url.clone())
    }

    /// 检查是否为内存数据库
    #[must_use]
    pub fn is_memory_database(&self) -> bool {
        self.url.contains(":memory:")
    }

    /// 检查是否为SQLite数据库
    #[must_use]
    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database_detection() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        assert!(config.is_sqlite());
        assert!(config.is_memory_database());
        assert!(config.ensure_database_path().is_ok());
    }
}
