//! 应用状态定义

use std::sync::Arc;

use ledger_shared::database::Database;

use crate::service::UnlockService;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub unlock_service: Arc<UnlockService>,
    /// 事务模式下的数据库连接，供健康检查使用
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(unlock_service: Arc<UnlockService>) -> Self {
        Self {
            unlock_service,
            database: None,
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }
}
