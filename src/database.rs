//! # 数据库模块
//!
//! 数据库连接和迁移管理

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::{
    linfo,
    logging::{LogComponent, LogStage},
};

/// 初始化数据库连接
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection> {
    let url = config.get_connection_url()?;
    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Database,
        "db_connecting",
        "正在连接数据库",
        sqlite = config.is_sqlite(),
        memory = config.is_memory_database()
    );

    let mut options = ConnectOptions::new(url);
    options
        .max_connections(config.max_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout))
        .sqlx_logging(false);
    // 内存库每个连接都是独立的数据库
    if config.is_memory_database() {
        options.max_connections(1).min_connections(1);
    }

    let db = Database::connect(options).await?;
    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Database,
        "db_connected",
        "数据库连接成功"
    );
    Ok(db)
}

/// 运行数据库迁移
pub async fn run_migrations(db: &DatabaseConnection) -> Result<()> {
    ::migration::Migrator::up(db, None).await?;
    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Database,
        "migrations_applied",
        "数据库迁移完成"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity::users;
    use sea_orm::EntityTrait;

    #[tokio::test]
    async fn test_memory_database_migrates() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        let db = init_database(&config).await.unwrap();
        run_migrations(&db).await.unwrap();
        // 迁移可重复执行
        run_migrations(&db).await.unwrap();

        let all = users::Entity::find().all(&db).await.unwrap();
        assert!(all.is_empty());
    }
}
