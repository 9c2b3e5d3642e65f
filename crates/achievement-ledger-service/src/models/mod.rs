//! 账本领域模型
//!
//! 包含余额、解锁记录、审计事件与幂等记录

pub mod audit;
pub mod balance;
pub mod enums;
pub mod idempotency;
pub mod unlock;

// 重新导出常用类型
pub use audit::{AuditEvent, GrantAuditMetadata};
pub use balance::{CurrencyAmounts, UserBalance};
pub use enums::{AchievementTier, AuditReason};
pub use idempotency::IdempotencyRecord;
pub use unlock::AchievementUnlock;

/// 生成带前缀的记录 ID（时间有序）
pub fn make_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::now_v7().simple())
}
