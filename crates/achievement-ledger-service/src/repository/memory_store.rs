//! 内存账本存储
//!
//! 使用 DashMap 实现的键值存储，适用于测试和开发环境。
//! 不提供事务：工作单元内的写入立即生效，commit/rollback 为空操作。
//! 唯一约束仍然在各表的 entry 操作上保证。

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::traits::{LedgerStore, LedgerTx};
use crate::error::{LedgerError, Result};
use crate::models::{
    AchievementUnlock, AuditEvent, CurrencyAmounts, IdempotencyRecord, UserBalance,
};

/// 通用内存表
///
/// 基于 DashMap 实现，支持高并发读写
#[derive(Debug)]
pub struct MemoryTable<T> {
    data: Arc<DashMap<String, T>>,
}

impl<T: Clone> Default for MemoryTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> MemoryTable<T> {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    /// 插入或覆盖
    pub fn insert(&self, id: &str, value: T) {
        self.data.insert(id.to_string(), value);
    }

    /// 仅在 key 不存在时插入，返回是否插入成功
    pub fn insert_if_absent(&self, id: &str, value: T) -> bool {
        match self.data.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// 获取数据，返回克隆，不持有锁
    pub fn get(&self, id: &str) -> Option<T> {
        self.data.get(id).map(|v| v.clone())
    }

    /// 在持有条目锁的情况下修改数据
    ///
    /// 闭包返回错误时数据保持不变
    pub fn try_update<F>(&self, id: &str, f: F) -> Option<Result<T>>
    where
        F: FnOnce(&T) -> Result<T>,
    {
        self.data.get_mut(id).map(|mut entry| {
            let updated = f(entry.value())?;
            *entry.value_mut() = updated.clone();
            Ok(updated)
        })
    }

    /// 按条件筛选数据
    pub fn list_by<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.data
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }
}

impl<T> Clone for MemoryTable<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

/// 组合键，分隔符不会出现在正常 ID 中
fn composite_key(a: &str, b: &str) -> String {
    format!("{}\u{1f}{}", a, b)
}

#[derive(Clone, Default)]
struct MemoryTables {
    balances: MemoryTable<UserBalance>,
    unlocks: MemoryTable<AchievementUnlock>,
    audit_events: MemoryTable<AuditEvent>,
    idempotency: MemoryTable<IdempotencyRecord>,
}

/// 内存账本存储
///
/// clone 后共享同一份数据
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    tables: MemoryTables,
    auto_provision_users: bool,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 首次访问未知用户时自动创建零余额账户
    pub fn with_auto_provision(mut self, enabled: bool) -> Self {
        self.auto_provision_users = enabled;
        self
    }

    /// 创建或覆盖用户余额（账户创建属于外部流程，此处供开发和测试使用）
    pub fn seed_user(&self, user_id: &str, amounts: CurrencyAmounts) {
        self.tables
            .balances
            .insert(user_id, UserBalance::new(user_id, amounts));
    }

    /// 直接写入一条解锁记录（模拟历史数据）
    pub fn seed_unlock(&self, record: AchievementUnlock) -> bool {
        let key = composite_key(&record.user_id, &record.achievement_id);
        self.tables.unlocks.insert_if_absent(&key, record)
    }

    pub fn unlock_count(&self) -> usize {
        self.tables.unlocks.count()
    }

    pub fn audit_event_count(&self) -> usize {
        self.tables.audit_events.count()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn is_transactional(&self) -> bool {
        false
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        Ok(Box::new(MemoryLedgerTx {
            tables: self.tables.clone(),
            auto_provision_users: self.auto_provision_users,
        }))
    }

    async fn get_balance(&self, user_id: &str) -> Result<Option<UserBalance>> {
        Ok(self.tables.balances.get(user_id))
    }

    async fn list_unlocks(&self, user_id: &str) -> Result<Vec<AchievementUnlock>> {
        let mut unlocks = self.tables.unlocks.list_by(|u| u.user_id == user_id);
        unlocks.sort_by(|a, b| a.unlocked_at.cmp(&b.unlocked_at).then(a.id.cmp(&b.id)));
        Ok(unlocks)
    }

    async fn list_audit_events(&self, user_id: &str, limit: i64) -> Result<Vec<AuditEvent>> {
        let mut events = self
            .tables
            .audit_events
            .list_by(|e| e.target_user_id == user_id);
        // 按时间倒序
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        events.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(events)
    }

    async fn find_idempotency_record(
        &self,
        scope: &str,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        Ok(self
            .tables
            .idempotency
            .get(&composite_key(scope, idempotency_key)))
    }

    async fn touch_idempotency_record(&self, scope: &str, idempotency_key: &str) -> Result<()> {
        let now = chrono::Utc::now();
        self.tables
            .idempotency
            .try_update(&composite_key(scope, idempotency_key), |record| {
                Ok(IdempotencyRecord {
                    last_seen_at: now,
                    ..record.clone()
                })
            })
            .transpose()?;
        Ok(())
    }
}

/// 内存工作单元
pub struct MemoryLedgerTx {
    tables: MemoryTables,
    auto_provision_users: bool,
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn lock_balance(&mut self, user_id: &str) -> Result<Option<UserBalance>> {
        if let Some(balance) = self.tables.balances.get(user_id) {
            return Ok(Some(balance));
        }

        if self.auto_provision_users {
            let balance = UserBalance::new(user_id, CurrencyAmounts::ZERO);
            self.tables.balances.insert_if_absent(user_id, balance);
            return Ok(self.tables.balances.get(user_id));
        }

        Ok(None)
    }

    async fn find_unlock_record(
        &mut self,
        user_id: &str,
        achievement_id: &str,
    ) -> Result<Option<AchievementUnlock>> {
        Ok(self
            .tables
            .unlocks
            .get(&composite_key(user_id, achievement_id)))
    }

    async fn insert_unlock_record(&mut self, record: &AchievementUnlock) -> Result<bool> {
        let key = composite_key(&record.user_id, &record.achievement_id);
        Ok(self.tables.unlocks.insert_if_absent(&key, record.clone()))
    }

    async fn credit_balance(
        &mut self,
        user_id: &str,
        delta: &CurrencyAmounts,
    ) -> Result<UserBalance> {
        self.tables
            .balances
            .try_update(user_id, |current| {
                let amounts = current
                    .amounts()
                    .checked_add(delta)
                    .ok_or_else(|| LedgerError::BalanceOverflow(user_id.to_string()))?;
                Ok(UserBalance::new(user_id, amounts))
            })
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?
    }

    async fn append_audit_event(&mut self, event: &AuditEvent) -> Result<()> {
        if !self.tables.audit_events.insert_if_absent(&event.id, event.clone()) {
            return Err(LedgerError::Internal(format!(
                "审计事件 ID 重复: {}",
                event.id
            )));
        }
        Ok(())
    }

    async fn insert_idempotency_record(&mut self, record: &IdempotencyRecord) -> Result<()> {
        let key = composite_key(&record.scope, &record.idempotency_key);
        if self.tables.idempotency.insert_if_absent(&key, record.clone()) {
            Ok(())
        } else {
            Err(LedgerError::IdempotencyConflict {
                scope: record.scope.clone(),
                key: record.idempotency_key.clone(),
            })
        }
    }

    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        Ok(())
    }
}
