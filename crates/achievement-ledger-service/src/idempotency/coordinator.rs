//! 幂等协调器
//!
//! 在 (scope, idempotency_key) 下执行一个工作单元：首次执行时把响应与业务写入
//! 放在同一事务中提交，之后相同键的调用直接重放已存储的响应。
//! 并发重复请求由存储层唯一约束兜底，失败方回滚后读取胜出方的记录作为重放结果。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use ledger_shared::observability::metrics;

use crate::error::{LedgerError, Result};
use crate::models::IdempotencyRecord;
use crate::repository::{LedgerStore, LedgerTx};

/// 工作单元的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome<T> {
    /// 提交事务并保存响应，后续相同键的调用将重放该响应
    Commit(T),
    /// 无需写入：回滚事务，不保存幂等记录
    Rollback(T),
}

/// 可在幂等协调器中执行的工作单元
#[async_trait]
pub trait IdempotentMutation: Send + Sync {
    type Output: Serialize + DeserializeOwned + Send;

    async fn run(&self, tx: &mut dyn LedgerTx) -> Result<MutationOutcome<Self::Output>>;
}

/// 协调器返回值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotentResult<T> {
    pub replayed: bool,
    pub response: T,
}

/// 计算请求载荷指纹（SHA-256 十六进制）
pub fn request_hash<T: Serialize>(payload: &T) -> Result<String> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// 幂等协调器
///
/// 只负责可靠性包装，不感知具体业务
#[derive(Clone)]
pub struct IdempotencyCoordinator {
    store: Arc<dyn LedgerStore>,
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// 幂等执行
    ///
    /// `request_hash` 为 `Some` 时，已存在记录的指纹不一致将返回
    /// `IdempotencyPayloadMismatch`
    pub async fn execute<M: IdempotentMutation>(
        &self,
        scope: &str,
        idempotency_key: &str,
        request_hash: Option<String>,
        mutation: &M,
    ) -> Result<IdempotentResult<M::Output>> {
        if let Some(record) = self
            .store
            .find_idempotency_record(scope, idempotency_key)
            .await?
        {
            return self.replay(record, request_hash.as_deref()).await;
        }

        match self
            .run_once(scope, idempotency_key, request_hash.clone(), mutation)
            .await
        {
            Err(LedgerError::IdempotencyConflict { .. }) => {
                info!(
                    scope = %scope,
                    idempotency_key = %idempotency_key,
                    "并发重复请求，读取已提交的幂等记录"
                );
                let record = self
                    .store
                    .find_idempotency_record(scope, idempotency_key)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::Internal(format!(
                            "幂等键冲突后未找到记录: scope={}, key={}",
                            scope, idempotency_key
                        ))
                    })?;
                self.replay(record, request_hash.as_deref()).await
            }
            other => other,
        }
    }

    /// 开启事务执行一次工作单元，任何失败都回滚
    async fn run_once<M: IdempotentMutation>(
        &self,
        scope: &str,
        idempotency_key: &str,
        request_hash: Option<String>,
        mutation: &M,
    ) -> Result<IdempotentResult<M::Output>> {
        let mut tx = self.store.begin().await?;

        let result: Result<IdempotentResult<M::Output>> = async {
            match mutation.run(tx.as_mut()).await? {
                MutationOutcome::Rollback(response) => {
                    tx.rollback().await?;
                    Ok(IdempotentResult {
                        replayed: false,
                        response,
                    })
                }
                MutationOutcome::Commit(response) => {
                    let body = serde_json::to_value(&response)?;
                    let record =
                        IdempotencyRecord::new(scope, idempotency_key, request_hash, body);
                    tx.insert_idempotency_record(&record).await?;
                    tx.commit().await.map_err(|e| match e {
                        LedgerError::Database(ref db) if crate::error::is_unique_violation(db) => {
                            LedgerError::IdempotencyConflict {
                                scope: scope.to_string(),
                                key: idempotency_key.to_string(),
                            }
                        }
                        other => other,
                    })?;
                    debug!(scope = %scope, idempotency_key = %idempotency_key, "幂等记录已提交");
                    Ok(IdempotentResult {
                        replayed: false,
                        response,
                    })
                }
            }
        }
        .await;

        if let Err(ref e) = result {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(
                    error = %rollback_err,
                    original_error = %e,
                    "事务回滚失败"
                );
            }
        }

        result
    }

    async fn replay<T: DeserializeOwned>(
        &self,
        record: IdempotencyRecord,
        request_hash: Option<&str>,
    ) -> Result<IdempotentResult<T>> {
        if let (Some(stored), Some(incoming)) = (record.request_hash.as_deref(), request_hash) {
            if stored != incoming {
                warn!(
                    scope = %record.scope,
                    idempotency_key = %record.idempotency_key,
                    "幂等键复用于不同的请求载荷"
                );
                return Err(LedgerError::IdempotencyPayloadMismatch {
                    scope: record.scope,
                    key: record.idempotency_key,
                });
            }
        }

        if let Err(e) = self
            .store
            .touch_idempotency_record(&record.scope, &record.idempotency_key)
            .await
        {
            warn!(
                error = %e,
                scope = %record.scope,
                idempotency_key = %record.idempotency_key,
                "更新幂等记录 last_seen_at 失败"
            );
        }

        metrics::record_idempotency_replay(&record.scope);
        debug!(
            scope = %record.scope,
            idempotency_key = %record.idempotency_key,
            "重放幂等响应"
        );

        let response = serde_json::from_value(record.response_body)?;
        Ok(IdempotentResult {
            replayed: true,
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryLedgerStore;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counted {
        call: usize,
    }

    /// 记录执行次数的工作单元
    #[derive(Default)]
    struct CountingMutation {
        calls: AtomicUsize,
        rollback: bool,
        fail: bool,
        /// 在提交前写入一条竞争的幂等记录，模拟并发胜出方
        competitor: Option<IdempotencyRecord>,
    }

    #[async_trait]
    impl IdempotentMutation for CountingMutation {
        type Output = Counted;

        async fn run(&self, tx: &mut dyn LedgerTx) -> Result<MutationOutcome<Counted>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(LedgerError::Internal("boom".to_string()));
            }
            if let Some(record) = &self.competitor {
                tx.insert_idempotency_record(record).await?;
            }
            let body = Counted { call };
            if self.rollback {
                Ok(MutationOutcome::Rollback(body))
            } else {
                Ok(MutationOutcome::Commit(body))
            }
        }
    }

    fn coordinator(store: &MemoryLedgerStore) -> IdempotencyCoordinator {
        IdempotencyCoordinator::new(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn test_second_call_replays_without_running() {
        let store = MemoryLedgerStore::new();
        let coordinator = coordinator(&store);
        let mutation = CountingMutation::default();

        let first = coordinator
            .execute("test.scope", "k1", None, &mutation)
            .await
            .unwrap();
        assert!(!first.replayed);
        assert_eq!(first.response, Counted { call: 1 });

        let second = coordinator
            .execute("test.scope", "k1", None, &mutation)
            .await
            .unwrap();
        assert!(second.replayed);
        assert_eq!(second.response, Counted { call: 1 });
        assert_eq!(mutation.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let store = MemoryLedgerStore::new();
        let coordinator = coordinator(&store);
        let mutation = CountingMutation::default();

        coordinator.execute("a", "k", None, &mutation).await.unwrap();
        let other = coordinator.execute("b", "k", None, &mutation).await.unwrap();
        assert!(!other.replayed);
        assert_eq!(mutation.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rollback_outcome_is_not_stored() {
        let store = MemoryLedgerStore::new();
        let coordinator = coordinator(&store);
        let mutation = CountingMutation {
            rollback: true,
            ..Default::default()
        };

        coordinator.execute("s", "k", None, &mutation).await.unwrap();
        let again = coordinator.execute("s", "k", None, &mutation).await.unwrap();
        assert!(!again.replayed);
        assert_eq!(mutation.calls.load(Ordering::SeqCst), 2);
        assert!(store.find_idempotency_record("s", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_propagates_and_stores_nothing() {
        let store = MemoryLedgerStore::new();
        let coordinator = coordinator(&store);
        let mutation = CountingMutation {
            fail: true,
            ..Default::default()
        };

        let err = coordinator
            .execute("s", "k", None, &mutation)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Internal(_)));
        assert!(store.find_idempotency_record("s", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conflict_is_converted_to_replay() {
        let store = MemoryLedgerStore::new();
        let coordinator = coordinator(&store);
        let mutation = CountingMutation {
            competitor: Some(IdempotencyRecord::new("s", "k", None, json!({"call": 42}))),
            ..Default::default()
        };

        let result = coordinator.execute("s", "k", None, &mutation).await.unwrap();
        assert!(result.replayed);
        assert_eq!(result.response, Counted { call: 42 });
    }

    #[tokio::test]
    async fn test_payload_mismatch() {
        let store = MemoryLedgerStore::new();
        let coordinator = coordinator(&store);
        let mutation = CountingMutation::default();

        let hash_a = request_hash(&json!({"userId": "u1"})).unwrap();
        let hash_b = request_hash(&json!({"userId": "u2"})).unwrap();

        coordinator
            .execute("s", "k", Some(hash_a.clone()), &mutation)
            .await
            .unwrap();

        let err = coordinator
            .execute("s", "k", Some(hash_b), &mutation)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::IdempotencyPayloadMismatch { .. }));

        let replay = coordinator
            .execute("s", "k", Some(hash_a), &mutation)
            .await
            .unwrap();
        assert!(replay.replayed);
        assert_eq!(mutation.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_request_hash_is_stable() {
        let a = request_hash(&json!({"userId": "u1", "achievementId": "a1"})).unwrap();
        let b = request_hash(&json!({"userId": "u1", "achievementId": "a1"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
