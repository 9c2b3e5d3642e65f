//! PostgreSQL 账本存储
//!
//! 工作单元即数据库事务：`lock_balance` 使用 `SELECT ... FOR UPDATE` 行锁，
//! 唯一约束冲突通过 `ON CONFLICT` 或 SQLSTATE 23505 识别。

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::traits::{LedgerStore, LedgerTx};
use crate::error::{LedgerError, Result, is_unique_violation};
use crate::models::{
    AchievementUnlock, AuditEvent, CurrencyAmounts, IdempotencyRecord, UserBalance,
};

/// numeric_value_out_of_range
const SQLSTATE_NUMERIC_OUT_OF_RANGE: &str = "22003";

/// PostgreSQL 账本存储
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    auto_provision_users: bool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            auto_provision_users: false,
        }
    }

    /// 首次访问未知用户时自动创建零余额账户
    pub fn with_auto_provision(mut self, enabled: bool) -> Self {
        self.auto_provision_users = enabled;
        self
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    fn is_transactional(&self) -> bool {
        true
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx {
            tx: Some(tx),
            auto_provision_users: self.auto_provision_users,
        }))
    }

    async fn get_balance(&self, user_id: &str) -> Result<Option<UserBalance>> {
        let balance = sqlx::query_as::<_, UserBalance>(
            r#"
            SELECT id, souls, gem_dust, blood_gems
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn list_unlocks(&self, user_id: &str) -> Result<Vec<AchievementUnlock>> {
        let unlocks = sqlx::query_as::<_, AchievementUnlock>(
            r#"
            SELECT id, user_id, achievement_id, tier, hidden, unlocked_at
            FROM achievement_unlocks
            WHERE user_id = $1
            ORDER BY unlocked_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(unlocks)
    }

    async fn list_audit_events(&self, user_id: &str, limit: i64) -> Result<Vec<AuditEvent>> {
        let events = sqlx::query_as::<_, AuditEvent>(
            r#"
            SELECT id, actor_user_id, target_user_id, entity_type, entity_id,
                   event_type, request_id, idempotency_key, metadata, created_at
            FROM economy_audit_log
            WHERE target_user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn find_idempotency_record(
        &self,
        scope: &str,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT id, scope, idempotency_key, request_hash, response_body,
                   created_at, last_seen_at
            FROM idempotency_keys
            WHERE scope = $1 AND idempotency_key = $2
            "#,
        )
        .bind(scope)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn touch_idempotency_record(&self, scope: &str, idempotency_key: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET last_seen_at = NOW()
            WHERE scope = $1 AND idempotency_key = $2
            "#,
        )
        .bind(scope)
        .bind(idempotency_key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// PostgreSQL 工作单元
///
/// 提交或回滚后事务被取走，后续调用返回内部错误；
/// 未结束即被丢弃时由 sqlx 自动回滚
pub struct PgLedgerTx {
    tx: Option<Transaction<'static, Postgres>>,
    auto_provision_users: bool,
}

impl PgLedgerTx {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| LedgerError::Internal("事务已结束".to_string()))
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_balance(&mut self, user_id: &str) -> Result<Option<UserBalance>> {
        let auto_provision = self.auto_provision_users;
        let conn = self.conn()?;

        if auto_provision {
            sqlx::query(
                r#"
                INSERT INTO users (id, souls, gem_dust, blood_gems, updated_at)
                VALUES ($1, 0, 0, 0, NOW())
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
        }

        let balance = sqlx::query_as::<_, UserBalance>(
            r#"
            SELECT id, souls, gem_dust, blood_gems
            FROM users
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(balance)
    }

    async fn find_unlock_record(
        &mut self,
        user_id: &str,
        achievement_id: &str,
    ) -> Result<Option<AchievementUnlock>> {
        let unlock = sqlx::query_as::<_, AchievementUnlock>(
            r#"
            SELECT id, user_id, achievement_id, tier, hidden, unlocked_at
            FROM achievement_unlocks
            WHERE user_id = $1 AND achievement_id = $2
            "#,
        )
        .bind(user_id)
        .bind(achievement_id)
        .fetch_optional(self.conn()?)
        .await?;

        Ok(unlock)
    }

    async fn insert_unlock_record(&mut self, record: &AchievementUnlock) -> Result<bool> {
        let inserted = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO achievement_unlocks (id, user_id, achievement_id, tier, hidden, unlocked_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, achievement_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.achievement_id)
        .bind(record.tier)
        .bind(record.hidden)
        .bind(record.unlocked_at)
        .fetch_optional(self.conn()?)
        .await?;

        Ok(inserted.is_some())
    }

    async fn credit_balance(
        &mut self,
        user_id: &str,
        delta: &CurrencyAmounts,
    ) -> Result<UserBalance> {
        let result = sqlx::query_as::<_, UserBalance>(
            r#"
            UPDATE users
            SET souls = souls + $2,
                gem_dust = gem_dust + $3,
                blood_gems = blood_gems + $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, souls, gem_dust, blood_gems
            "#,
        )
        .bind(user_id)
        .bind(delta.souls)
        .bind(delta.gem_dust)
        .bind(delta.blood_gems)
        .fetch_optional(self.conn()?)
        .await;

        match result {
            Ok(Some(balance)) => Ok(balance),
            Ok(None) => Err(LedgerError::UserNotFound(user_id.to_string())),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(SQLSTATE_NUMERIC_OUT_OF_RANGE) =>
            {
                Err(LedgerError::BalanceOverflow(user_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append_audit_event(&mut self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO economy_audit_log (
                id, actor_user_id, target_user_id, entity_type, entity_id,
                event_type, request_id, idempotency_key, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&event.id)
        .bind(&event.actor_user_id)
        .bind(&event.target_user_id)
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(&event.event_type)
        .bind(&event.request_id)
        .bind(&event.idempotency_key)
        .bind(&event.metadata)
        .bind(event.created_at)
        .execute(self.conn()?)
        .await?;

        Ok(())
    }

    async fn insert_idempotency_record(&mut self, record: &IdempotencyRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (
                id, scope, idempotency_key, request_hash, response_body, created_at, last_seen_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.id)
        .bind(&record.scope)
        .bind(&record.idempotency_key)
        .bind(&record.request_hash)
        .bind(&record.response_body)
        .bind(record.created_at)
        .bind(record.last_seen_at)
        .execute(self.conn()?)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(LedgerError::IdempotencyConflict {
                scope: record.scope.clone(),
                key: record.idempotency_key.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(LedgerError::Internal("事务已结束".to_string())),
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => Ok(tx.rollback().await?),
            None => Ok(()),
        }
    }
}
