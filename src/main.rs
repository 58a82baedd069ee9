//! # MCP SSO Auth 主程序

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use mcp_sso_auth::{
    Result,
    auth::{ApiKeyManager, SeaOrmApiKeyStore, SeaOrmUserDirectory, UserDirectory},
    config::{self, AppConfig},
    config_error,
    database::{init_database, run_migrations},
    lerror, linfo,
    logging::{self, LogComponent, LogStage},
    server::{WhoAmIHandler, run_server},
};

#[derive(Debug, Parser)]
#[command(name = "mcp-sso-auth", version, about = "MCP SSO / API key auth gateway")]
struct Cli {
    /// 配置文件路径（默认 config/config.{RUST_ENV}.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 日志过滤（覆盖默认值，`RUST_LOG` 优先）
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 启动 HTTP 服务（默认）
    Serve,
    /// 只运行数据库迁移
    Migrate,
    /// 为用户签发 API Key
    IssueKey {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        expires_in_days: Option<u32>,
    },
    /// 在本地用户目录中创建用户
    CreateUser {
        #[arg(long)]
        id: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref());

    if let Err(e) = run(cli).await {
        lerror!(
            "system",
            LogStage::Shutdown,
            LogComponent::Main,
            "command_failed",
            &format!("执行失败: {e}")
        );
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config, Arc::new(WhoAmIHandler)).await,
        Command::Migrate => {
            let db = init_database(&config.database).await?;
            run_migrations(&db).await
        }
        Command::IssueKey {
            user,
            name,
            expires_in_days,
        } => issue_key(&config, &user, &name, expires_in_days).await,
        Command::CreateUser { id, email, name } => {
            let db = Arc::new(init_database(&config.database).await?);
            run_migrations(&db).await?;
            let user = SeaOrmUserDirectory::new(db)
                .create_user(&id, &email, name.as_deref())
                .await?;
            println!("{} <{}>", user.id, user.email);
            Ok(())
        }
    }
}

async fn issue_key(
    config: &AppConfig,
    user_id: &str,
    name: &str,
    expires_in_days: Option<u32>,
) -> Result<()> {
    let db = Arc::new(init_database(&config.database).await?);
    run_migrations(&db).await?;

    let users: Arc<dyn UserDirectory> = Arc::new(SeaOrmUserDirectory::new(Arc::clone(&db)));
    let active = users
        .get_user_by_id(user_id)
        .await?
        .is_some_and(|user| user.is_active());
    if !active {
        return Err(config_error!("用户 {} 不存在或已删除", user_id));
    }

    let manager = ApiKeyManager::new(Arc::new(SeaOrmApiKeyStore::new(db)), users);
    let issued = manager
        .generate(
            user_id,
            name,
            expires_in_days.or(config.api_keys.default_expires_in_days),
        )
        .await?;

    linfo!(
        "system",
        LogStage::Authentication,
        LogComponent::Main,
        "issue_key",
        "API Key 已签发",
        key_prefix = %issued.key_prefix
    );
    println!("{}", issued.api_key);
    Ok(())
}
