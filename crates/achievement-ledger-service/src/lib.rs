//! 成就奖励账本服务
//!
//! 玩家解锁成就时，按档位发放游戏货币，并保证每个 (用户, 成就) 至多入账一次。
//!
//! ## 核心功能
//!
//! - **奖励解析**：档位 -> 基础奖励，隐藏成就奖励加倍
//! - **成就解锁**：写入解锁记录、入账余额、追加审计事件
//! - **幂等执行**：事务模式下重复或并发的解锁请求重放首次结果
//! - **余额查询**：查询用户余额与已解锁成就
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `reward`: 奖励档位表与解析器
//! - `repository`: 持久化层（PostgreSQL / 内存）
//! - `idempotency`: 幂等协调器
//! - `audit`: 经济审计日志
//! - `service`: 业务服务层
//! - `http`: REST API

pub mod audit;
pub mod error;
pub mod http;
pub mod idempotency;
pub mod models;
pub mod repository;
pub mod reward;
pub mod service;

pub use audit::{AuditLogger, CreditAuditEntry};
pub use error::{LedgerError, Result};
pub use idempotency::{IdempotencyCoordinator, IdempotentMutation, IdempotentResult, MutationOutcome};
pub use models::*;
pub use repository::{LedgerStore, LedgerTx, MemoryLedgerStore, PgLedgerStore};
pub use reward::{RewardMeta, RewardTable, RewardTierResolver};
pub use service::{UnlockService, dto};
