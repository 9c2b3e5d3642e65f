//! 账本持久化层
//!
//! 提供余额、解锁记录、审计日志与幂等记录的数据访问。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 两种实现：PostgreSQL（事务 + 行锁）与内存（无事务）
//! - 服务层根据 `is_transactional` 选择执行模式
//! - 定义 trait 接口以支持 mock 测试

mod memory_store;
mod pg_store;
mod traits;

pub use memory_store::{MemoryLedgerStore, MemoryLedgerTx, MemoryTable};
pub use pg_store::{PgLedgerStore, PgLedgerTx};
pub use traits::*;
