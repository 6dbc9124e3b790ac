//! MEDCV服务器主程序

mod config;

use clap::Parser;
use medcv_core::{MedcvError, Result, UserRole};
use medcv_database::{DatabasePool, DatabaseQueries, NewUser};
use medcv_storage::StorageManager;
use medcv_web::{AppState, AuthService, WebServer};
use medcv_workflow::{AnalysisWorkflow, StubCvModel};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::BootstrapConfig;

/// MEDCV服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "medcv-server")]
#[command(about = "医学影像诊断工作流服务器")]
struct Args {
    /// 监听主机
    #[arg(long)]
    host: Option<String>,

    /// 服务器端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 数据库连接字符串
    #[arg(long)]
    database_url: Option<String>,

    /// 影像存储目录
    #[arg(short, long)]
    storage_dir: Option<String>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_level))
        .init();

    info!("Starting MEDCV server...");

    let mut config = config::load(args.config.as_deref())?;

    // 命令行参数覆盖配置文件
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database_url) = args.database_url {
        config.database.url = database_url;
    }
    if let Some(storage_dir) = args.storage_dir {
        config.storage.base_dir = storage_dir;
    }

    info!("Server configuration:");
    info!("  listen: {}:{}", config.server.host, config.server.port);
    info!("  storage dir: {}", config.storage.base_dir);
    info!("  token ttl: {}h", config.auth.token_ttl_hours);

    // 数据库连接池：进程级状态，退出前统一排空
    let db = DatabasePool::connect(&config.database.url, config.database.max_connections).await?;
    DatabaseQueries::new(&db).create_tables().await?;

    // 存储目录
    let storage = Arc::new(StorageManager::new(&config.storage.base_dir));
    storage.init().await?;

    // 显式引导管理员账号
    bootstrap_admin(&db, &config.bootstrap).await?;

    let auth = AuthService::new(config.auth.jwt_secret.clone(), config.auth.token_ttl_hours);
    let workflow = AnalysisWorkflow::new(db.clone(), storage, Arc::new(StubCvModel));
    let state = Arc::new(AppState {
        db: db.clone(),
        auth,
        workflow,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| MedcvError::Config(format!("非法监听地址: {e}")))?;

    let server = WebServer::new(addr, state);
    let run_result = server.run().await;

    // 无论正常退出还是出错都排空连接池
    db.close().await;

    if let Err(e) = run_result {
        error!("Server exited with error: {}", e);
        return Err(e);
    }

    info!("Server stopped");
    Ok(())
}

/// 引导管理员账号
///
/// 替代隐式的启动副作用：账号已存在则跳过，否则按配置显式创建并记录。
async fn bootstrap_admin(db: &DatabasePool, bootstrap: &BootstrapConfig) -> Result<()> {
    if !bootstrap.enabled {
        info!("Admin bootstrap disabled");
        return Ok(());
    }

    let queries = DatabaseQueries::new(db);

    if queries
        .get_user_by_username(&bootstrap.admin_username)
        .await?
        .is_some()
    {
        info!(
            username = %bootstrap.admin_username,
            "Bootstrap admin already present"
        );
        return Ok(());
    }

    let password_hash = medcv_web::auth::hash_password(&bootstrap.admin_password)?;
    let user = queries
        .create_user(&NewUser {
            username: bootstrap.admin_username.clone(),
            password_hash,
            role: UserRole::Admin,
        })
        .await?;

    info!(user_id = user.id, username = %user.username, "Bootstrap admin created");

    if bootstrap.admin_password == BootstrapConfig::default().admin_password {
        warn!("Bootstrap admin is using the default password, change it before exposing the server");
    }

    Ok(())
}
