//! 成就奖励账本服务
//!
//! 提供成就解锁与余额查询 REST API。

use std::sync::Arc;
use std::time::Duration;

use achievement_ledger::{
    LedgerStore, MemoryLedgerStore, PgLedgerStore, RewardTable, RewardTierResolver, UnlockService,
    http::{AppState, create_router},
};
use ledger_shared::{
    config::{AppConfig, StorageBackend},
    database::Database,
    observability,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "achievement-ledger";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load(SERVICE_NAME)?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        backend = ?config.storage.backend,
        "Starting {} on {}",
        SERVICE_NAME,
        config.server_addr()
    );

    // 奖励表：配置段缺省时使用内置默认值
    let rewards = AppConfig::load_section::<RewardTable>(SERVICE_NAME, "rewards")?
        .unwrap_or_default();
    rewards.validate()?;
    let resolver = RewardTierResolver::new(Arc::new(rewards));

    let mut database = None;
    let store: Arc<dyn LedgerStore> = match config.storage.backend {
        StorageBackend::Postgres => {
            let db = Database::connect(&config.database).await?;
            if config.database.run_migrations {
                db.run_migrations(&config.database.migrations_dir).await?;
            }
            let store = PgLedgerStore::new(db.pool().clone())
                .with_auto_provision(config.storage.auto_provision_users);
            database = Some(db);
            Arc::new(store)
        }
        StorageBackend::Memory => {
            if config.is_production() {
                warn!("生产环境使用内存存储：无事务与幂等保证，数据不会持久化");
            } else {
                info!("使用内存存储（简单模式）");
            }
            Arc::new(
                MemoryLedgerStore::new().with_auto_provision(config.storage.auto_provision_users),
            )
        }
    };

    let unlock_service = Arc::new(UnlockService::new(store, resolver));
    let mut state = AppState::new(unlock_service);
    if let Some(db) = &database {
        state = state.with_database(db.clone());
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(
        state,
        Duration::from_secs(config.server.request_timeout_seconds),
    )
    .layer(cors);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 收到 SIGTERM 或 Ctrl+C 后停止接收新连接，等待已有请求处理完毕
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(db) = database {
        db.close().await;
    }

    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
