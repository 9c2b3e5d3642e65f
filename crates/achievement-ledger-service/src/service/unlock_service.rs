//! 成就解锁服务
//!
//! 账本变更的编排入口：校验请求、解析奖励、写入解锁记录、入账并追加审计事件。
//!
//! ## 执行模式
//!
//! - 简单模式（存储不支持事务）：直接在工作单元中执行，不保证并发重复请求的原子性
//! - 事务模式：整个流程包在幂等协调器中，相同 (user, achievement) 至多入账一次

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use ledger_shared::observability::metrics;

use super::dto::{
    BalancesDto, UnlockAchievementRequest, UnlockAchievementResponse, UnlockFingerprint,
    UnlockOutcome, UserAchievementsDto, normalize_id,
};
use crate::audit::{AuditLogger, CreditAuditEntry};
use crate::error::{LedgerError, Result};
use crate::idempotency::{IdempotencyCoordinator, IdempotentMutation, MutationOutcome, request_hash};
use crate::models::{AchievementUnlock, AuditEvent, GrantAuditMetadata};
use crate::repository::{LedgerStore, LedgerTx};
use crate::reward::RewardTierResolver;

/// 成就解锁的幂等作用域
pub const UNLOCK_SCOPE: &str = "achievement.unlock";

/// 成就解锁的幂等键
pub fn unlock_idempotency_key(user_id: &str, achievement_id: &str) -> String {
    format!("achievement_unlock:{}:{}", user_id, achievement_id)
}

/// 成就解锁服务
pub struct UnlockService {
    store: Arc<dyn LedgerStore>,
    resolver: RewardTierResolver,
    coordinator: IdempotencyCoordinator,
    audit: AuditLogger,
}

impl UnlockService {
    pub fn new(store: Arc<dyn LedgerStore>, resolver: RewardTierResolver) -> Self {
        Self {
            coordinator: IdempotencyCoordinator::new(store.clone()),
            store,
            resolver,
            audit: AuditLogger::new(),
        }
    }

    pub fn is_transactional(&self) -> bool {
        self.store.is_transactional()
    }

    /// 解锁成就并发放奖励
    ///
    /// 重复解锁不是错误，返回 `already_unlocked = true`。
    /// 事务模式下对同一键的重复调用返回首次结果，`replayed = true`。
    #[instrument(
        skip(self),
        fields(user_id = %request.user_id, achievement_id = %request.achievement_id)
    )]
    pub async fn unlock_achievement(
        &self,
        request: UnlockAchievementRequest,
    ) -> Result<UnlockOutcome> {
        let start = Instant::now();

        let result = match request.normalized() {
            Ok(request) if self.store.is_transactional() => {
                self.unlock_transactional(&request).await
            }
            Ok(request) => self.unlock_simple(&request).await,
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(o) if o.replayed => "replayed",
            Ok(o) if o.response.already_unlocked => "already_unlocked",
            Ok(_) => "granted",
            Err(_) => "failed",
        };
        metrics::record_achievement_unlock(outcome, start.elapsed().as_secs_f64());

        match &result {
            Ok(o) => info!(
                outcome = outcome,
                souls = o.response.balances.souls,
                gem_dust = o.response.balances.gem_dust,
                blood_gems = o.response.balances.blood_gems,
                "成就解锁处理完成"
            ),
            Err(e) if e.is_business_error() => warn!(error = %e, "成就解锁被拒绝"),
            Err(e) => tracing::error!(error = %e, "成就解锁失败"),
        }

        result
    }

    async fn unlock_transactional(
        &self,
        request: &UnlockAchievementRequest,
    ) -> Result<UnlockOutcome> {
        let idempotency_key = unlock_idempotency_key(&request.user_id, &request.achievement_id);
        let fingerprint = request_hash(&UnlockFingerprint {
            user_id: &request.user_id,
            achievement_id: &request.achievement_id,
        })?;

        let mutation = UnlockMutation {
            resolver: &self.resolver,
            audit: &self.audit,
            request,
            idempotency_key: Some(idempotency_key.clone()),
        };

        let result = self
            .coordinator
            .execute(UNLOCK_SCOPE, &idempotency_key, Some(fingerprint), &mutation)
            .await?;

        Ok(UnlockOutcome {
            response: result.response,
            replayed: result.replayed,
        })
    }

    async fn unlock_simple(&self, request: &UnlockAchievementRequest) -> Result<UnlockOutcome> {
        let mutation = UnlockMutation {
            resolver: &self.resolver,
            audit: &self.audit,
            request,
            idempotency_key: None,
        };

        let mut tx = self.store.begin().await?;
        let response = match mutation.run(tx.as_mut()).await {
            Ok(MutationOutcome::Commit(response)) => {
                tx.commit().await?;
                response
            }
            Ok(MutationOutcome::Rollback(response)) => {
                tx.rollback().await?;
                response
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "工作单元回滚失败");
                }
                return Err(e);
            }
        };

        Ok(UnlockOutcome {
            response,
            replayed: false,
        })
    }

    /// 查询用户余额
    #[instrument(skip(self))]
    pub async fn get_balances(&self, user_id: &str) -> Result<BalancesDto> {
        let user_id = normalize_id("userId", user_id)?;
        self.store
            .get_balance(&user_id)
            .await?
            .map(BalancesDto::from)
            .ok_or(LedgerError::UserNotFound(user_id))
    }

    /// 查询用户已解锁的成就（按解锁时间升序）
    #[instrument(skip(self))]
    pub async fn list_unlocks(&self, user_id: &str) -> Result<UserAchievementsDto> {
        let user_id = normalize_id("userId", user_id)?;
        let achievements = self.store.list_unlocks(&user_id).await?;
        Ok(UserAchievementsDto {
            total: achievements.len(),
            user_id,
            achievements,
        })
    }

    /// 查询用户最近的审计事件（按时间倒序）
    pub async fn list_audit_events(&self, user_id: &str, limit: i64) -> Result<Vec<AuditEvent>> {
        let user_id = normalize_id("userId", user_id)?;
        self.store.list_audit_events(&user_id, limit).await
    }
}

/// 一次解锁的工作单元
struct UnlockMutation<'a> {
    resolver: &'a RewardTierResolver,
    audit: &'a AuditLogger,
    request: &'a UnlockAchievementRequest,
    idempotency_key: Option<String>,
}

#[async_trait]
impl<'a> IdempotentMutation for UnlockMutation<'a> {
    type Output = UnlockAchievementResponse;

    async fn run(
        &self,
        tx: &mut dyn LedgerTx,
    ) -> Result<MutationOutcome<UnlockAchievementResponse>> {
        let user_id = &self.request.user_id;
        let achievement_id = &self.request.achievement_id;
        let resolved = self
            .resolver
            .resolve_requested(self.request.tier.as_deref(), self.request.hidden);

        // 1. 锁定余额行
        let balance = tx
            .lock_balance(user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.clone()))?;

        // 2. 重复解锁检查，rewardMeta 按本次请求返回
        if let Some(existing) = tx.find_unlock_record(user_id, achievement_id).await? {
            if existing.tier != resolved.meta.tier || existing.hidden != resolved.meta.hidden {
                warn!(
                    stored_tier = %existing.tier,
                    stored_hidden = existing.hidden,
                    requested_tier = %resolved.meta.tier,
                    requested_hidden = resolved.meta.hidden,
                    "重复解锁请求的档位与原记录不一致"
                );
            }
            return Ok(MutationOutcome::Rollback(
                UnlockAchievementResponse::already_unlocked(resolved.meta, balance.amounts()),
            ));
        }

        // 3. 入账前检查溢出，避免留下未入账的解锁记录
        if balance.amounts().checked_add(&resolved.reward).is_none() {
            return Err(LedgerError::BalanceOverflow(user_id.clone()));
        }

        // 4. 写入解锁记录，唯一约束兜底
        let record =
            AchievementUnlock::new(user_id, achievement_id, resolved.meta.tier, resolved.meta.hidden);
        if !tx.insert_unlock_record(&record).await? {
            info!("解锁记录已被并发写入，按重复解锁处理");
            return Ok(MutationOutcome::Rollback(
                UnlockAchievementResponse::already_unlocked(resolved.meta, balance.amounts()),
            ));
        }

        // 5. 入账
        let updated = tx.credit_balance(user_id, &resolved.reward).await?;

        // 6. 审计
        self.audit
            .append_credit(
                tx,
                CreditAuditEntry {
                    user_id: user_id.clone(),
                    metadata: GrantAuditMetadata::achievement_unlock(
                        resolved.meta.tier,
                        resolved.meta.hidden,
                        &resolved.reward,
                    ),
                    request_id: self.request.request_id.clone(),
                    idempotency_key: self.idempotency_key.clone(),
                },
            )
            .await?;

        Ok(MutationOutcome::Commit(UnlockAchievementResponse::granted(
            resolved.reward,
            resolved.meta,
            updated.amounts(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AchievementTier, CurrencyAmounts, UserBalance};
    use crate::repository::{MemoryLedgerStore, MockLedgerStore, MockLedgerTx};

    fn memory_service(store: &MemoryLedgerStore) -> UnlockService {
        UnlockService::new(Arc::new(store.clone()), RewardTierResolver::default())
    }

    #[test]
    fn test_idempotency_key_format() {
        assert_eq!(
            unlock_idempotency_key("u1", "first_blood"),
            "achievement_unlock:u1:first_blood"
        );
    }

    #[tokio::test]
    async fn test_simple_mode_grant_and_duplicate() {
        let store = MemoryLedgerStore::new();
        store.seed_user("u1", CurrencyAmounts::new(10, 1, 2));
        let service = memory_service(&store);
        assert!(!service.is_transactional());

        let first = service
            .unlock_achievement(UnlockAchievementRequest::new("u1", "a1").with_tier("bronze"))
            .await
            .unwrap();
        assert!(first.response.unlocked);
        assert!(!first.replayed);
        assert_eq!(first.response.balances, CurrencyAmounts::new(110, 6, 2));

        let second = service
            .unlock_achievement(UnlockAchievementRequest::new("u1", "a1").with_tier("platinum"))
            .await
            .unwrap();
        assert!(second.response.already_unlocked);
        assert!(!second.replayed);
        assert!(second.response.reward.is_zero());
        assert_eq!(second.response.reward_meta.tier, AchievementTier::Platinum);
        assert_eq!(second.response.balances, CurrencyAmounts::new(110, 6, 2));
        assert_eq!(store.unlock_count(), 1);
        assert_eq!(store.audit_event_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_writes_nothing() {
        let store = MemoryLedgerStore::new();
        let service = memory_service(&store);

        let err = service
            .unlock_achievement(UnlockAchievementRequest::new("ghost", "a1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UserNotFound(_)));
        assert_eq!(store.unlock_count(), 0);
        assert_eq!(store.audit_event_count(), 0);
    }

    #[tokio::test]
    async fn test_validation_rejects_blank_ids() {
        let store = MemoryLedgerStore::new();
        let service = memory_service(&store);

        let err = service
            .unlock_achievement(UnlockAchievementRequest::new("u1", "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_transactional_duplicate_performs_no_writes() {
        let stored = UserBalance::new("u1", CurrencyAmounts::new(2110, 6, 52));

        let mut tx = MockLedgerTx::new();
        let locked = stored.clone();
        tx.expect_lock_balance()
            .times(1)
            .returning(move |_| Ok(Some(locked.clone())));
        tx.expect_find_unlock_record()
            .times(1)
            .returning(|user_id, achievement_id| {
                Ok(Some(AchievementUnlock::new(
                    user_id,
                    achievement_id,
                    AchievementTier::Gold,
                    false,
                )))
            });
        tx.expect_insert_unlock_record().times(0);
        tx.expect_credit_balance().times(0);
        tx.expect_append_audit_event().times(0);
        tx.expect_insert_idempotency_record().times(0);
        tx.expect_commit().times(0);
        tx.expect_rollback().times(1).returning(|| Ok(()));

        let mut store = MockLedgerStore::new();
        store.expect_is_transactional().return_const(true);
        store
            .expect_find_idempotency_record()
            .times(1)
            .returning(|_, _| Ok(None));
        store
            .expect_begin()
            .times(1)
            .return_once(move || Ok(Box::new(tx) as Box<dyn LedgerTx>));

        let service = UnlockService::new(Arc::new(store), RewardTierResolver::default());
        let outcome = service
            .unlock_achievement(UnlockAchievementRequest::new("u1", "a1").with_tier("gold"))
            .await
            .unwrap();

        assert!(!outcome.replayed);
        assert!(outcome.response.already_unlocked);
        assert!(!outcome.response.unlocked);
        assert!(outcome.response.reward.is_zero());
        assert_eq!(outcome.response.balances, stored.amounts());
    }

    #[tokio::test]
    async fn test_transactional_audit_failure_rolls_back() {
        let mut tx = MockLedgerTx::new();
        tx.expect_lock_balance()
            .times(1)
            .returning(|user_id| Ok(Some(UserBalance::new(user_id, CurrencyAmounts::new(10, 1, 2)))));
        tx.expect_find_unlock_record()
            .times(1)
            .returning(|_, _| Ok(None));
        tx.expect_insert_unlock_record()
            .times(1)
            .returning(|_| Ok(true));
        tx.expect_credit_balance()
            .times(1)
            .returning(|user_id, reward| {
                let credited = CurrencyAmounts::new(10, 1, 2).checked_add(reward).unwrap();
                Ok(UserBalance::new(user_id, credited))
            });
        tx.expect_append_audit_event()
            .times(1)
            .returning(|_| Err(LedgerError::Internal("audit log unavailable".to_string())));
        tx.expect_insert_idempotency_record().times(0);
        tx.expect_commit().times(0);
        tx.expect_rollback().times(1).returning(|| Ok(()));

        let mut store = MockLedgerStore::new();
        store.expect_is_transactional().return_const(true);
        store
            .expect_find_idempotency_record()
            .times(1)
            .returning(|_, _| Ok(None));
        store
            .expect_begin()
            .times(1)
            .return_once(move || Ok(Box::new(tx) as Box<dyn LedgerTx>));

        let service = UnlockService::new(Arc::new(store), RewardTierResolver::default());
        let err = service
            .unlock_achievement(UnlockAchievementRequest::new("u1", "a1").with_tier("bronze"))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Internal(ref msg) if msg == "audit log unavailable"));
    }

    #[tokio::test]
    async fn test_overflow_is_detected_before_insert() {
        let mut tx = MockLedgerTx::new();
        tx.expect_lock_balance()
            .times(1)
            .returning(|user_id| Ok(Some(UserBalance::new(user_id, CurrencyAmounts::new(i64::MAX, 0, 0)))));
        tx.expect_find_unlock_record()
            .times(1)
            .returning(|_, _| Ok(None));
        tx.expect_insert_unlock_record().times(0);
        tx.expect_credit_balance().times(0);
        tx.expect_append_audit_event().times(0);
        tx.expect_commit().times(0);
        tx.expect_rollback().times(1).returning(|| Ok(()));

        let mut store = MockLedgerStore::new();
        store.expect_is_transactional().return_const(false);
        store
            .expect_begin()
            .times(1)
            .return_once(move || Ok(Box::new(tx) as Box<dyn LedgerTx>));

        let service = UnlockService::new(Arc::new(store), RewardTierResolver::default());
        let err = service
            .unlock_achievement(UnlockAchievementRequest::new("u1", "a1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::BalanceOverflow(_)));
    }

    #[tokio::test]
    async fn test_transactional_replay_skips_work_unit() {
        let response = UnlockAchievementResponse::granted(
            CurrencyAmounts::new(100, 5, 0),
            crate::reward::RewardMeta::new(AchievementTier::Bronze, false),
            CurrencyAmounts::new(110, 6, 2),
        );
        let fingerprint = request_hash(&UnlockFingerprint {
            user_id: "u1",
            achievement_id: "a1",
        })
        .unwrap();
        let record = crate::models::IdempotencyRecord::new(
            UNLOCK_SCOPE,
            unlock_idempotency_key("u1", "a1"),
            Some(fingerprint),
            serde_json::to_value(&response).unwrap(),
        );

        let mut store = MockLedgerStore::new();
        store.expect_is_transactional().return_const(true);
        store
            .expect_find_idempotency_record()
            .withf(|scope, key| scope == UNLOCK_SCOPE && key == "achievement_unlock:u1:a1")
            .times(1)
            .return_once(move |_, _| Ok(Some(record)));
        store
            .expect_touch_idempotency_record()
            .times(1)
            .returning(|_, _| Ok(()));
        store.expect_begin().times(0);

        let service = UnlockService::new(Arc::new(store), RewardTierResolver::default());
        let outcome = service
            .unlock_achievement(UnlockAchievementRequest::new("u1", "a1"))
            .await
            .unwrap();

        assert!(outcome.replayed);
        assert_eq!(outcome.response, response);
    }

    #[tokio::test]
    async fn test_ambiguous_key_is_rejected_by_fingerprint() {
        // "a:b" + "c" 与 "a" + "b:c" 得到相同的幂等键，指纹不同
        let fingerprint = request_hash(&UnlockFingerprint {
            user_id: "a:b",
            achievement_id: "c",
        })
        .unwrap();
        let record = crate::models::IdempotencyRecord::new(
            UNLOCK_SCOPE,
            unlock_idempotency_key("a:b", "c"),
            Some(fingerprint),
            serde_json::json!({}),
        );

        let mut store = MockLedgerStore::new();
        store.expect_is_transactional().return_const(true);
        store
            .expect_find_idempotency_record()
            .return_once(move |_, _| Ok(Some(record)));
        store.expect_begin().times(0);

        let service = UnlockService::new(Arc::new(store), RewardTierResolver::default());
        let err = service
            .unlock_achievement(UnlockAchievementRequest::new("a", "b:c"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::IdempotencyPayloadMismatch { .. }));
    }

    #[tokio::test]
    async fn test_get_balances_and_list_unlocks() {
        let store = MemoryLedgerStore::new();
        store.seed_user("u1", CurrencyAmounts::ZERO);
        let service = memory_service(&store);

        service
            .unlock_achievement(UnlockAchievementRequest::new("u1", "a1").with_tier("silver"))
            .await
            .unwrap();

        let balances = service.get_balances("u1").await.unwrap();
        assert_eq!(balances.balances, CurrencyAmounts::new(500, 15, 0));

        let unlocks = service.list_unlocks("u1").await.unwrap();
        assert_eq!(unlocks.total, 1);
        assert_eq!(unlocks.achievements[0].tier, AchievementTier::Silver);

        assert!(matches!(
            service.get_balances("nobody").await,
            Err(LedgerError::UserNotFound(_))
        ));
    }
}
