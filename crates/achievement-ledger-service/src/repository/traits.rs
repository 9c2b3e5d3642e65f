//! 仓储 Trait 定义
//!
//! 账本持久化抽象：`LedgerStore` 负责会话外的查询与开启工作单元，
//! `LedgerTx` 是一次工作单元内的读写原语。服务层只依赖这两个接口，
//! 内存实现与 PostgreSQL 实现可以互换，也便于 mock 测试。

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    AchievementUnlock, AuditEvent, CurrencyAmounts, IdempotencyRecord, UserBalance,
};

/// 账本存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// 是否支持事务与行锁
    ///
    /// 不支持时服务以简单模式运行，不经过幂等协调器
    fn is_transactional(&self) -> bool;

    /// 开启工作单元（事务型实现即 BEGIN）
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;

    // 查询
    async fn get_balance(&self, user_id: &str) -> Result<Option<UserBalance>>;
    async fn list_unlocks(&self, user_id: &str) -> Result<Vec<AchievementUnlock>>;
    async fn list_audit_events(&self, user_id: &str, limit: i64) -> Result<Vec<AuditEvent>>;

    // 幂等记录
    async fn find_idempotency_record(
        &self,
        scope: &str,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>>;
    async fn touch_idempotency_record(&self, scope: &str, idempotency_key: &str) -> Result<()>;
}

/// 工作单元接口
///
/// 事务型实现中所有写入在 `commit` 前对外不可见；未提交即被丢弃时自动回滚
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerTx: Send {
    /// 读取用户余额并加排他行锁，直到工作单元结束
    async fn lock_balance(&mut self, user_id: &str) -> Result<Option<UserBalance>>;

    async fn find_unlock_record(
        &mut self,
        user_id: &str,
        achievement_id: &str,
    ) -> Result<Option<AchievementUnlock>>;

    /// 插入解锁记录
    ///
    /// 违反 (user_id, achievement_id) 唯一约束时返回 `Ok(false)`
    async fn insert_unlock_record(&mut self, record: &AchievementUnlock) -> Result<bool>;

    /// 余额增量入账，返回入账后的余额
    async fn credit_balance(
        &mut self,
        user_id: &str,
        delta: &CurrencyAmounts,
    ) -> Result<UserBalance>;

    async fn append_audit_event(&mut self, event: &AuditEvent) -> Result<()>;

    /// 写入幂等记录
    ///
    /// 违反 (scope, idempotency_key) 唯一约束时返回 `LedgerError::IdempotencyConflict`
    async fn insert_idempotency_record(&mut self, record: &IdempotencyRecord) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
}
