//! # 测试辅助函数
//!
//! 提供通用的测试工具和辅助函数

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::sync::Once;

static INIT: Once = Once::new();

/// 初始化测试日志（只输出到测试捕获的 writer）
pub fn init_test_env() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("debug,sqlx=warn,sea_orm=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// 创建内存数据库连接并运行迁移
///
/// 连接池固定为单连接，否则每个连接各自一份内存库。
pub async fn create_test_db() -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}
