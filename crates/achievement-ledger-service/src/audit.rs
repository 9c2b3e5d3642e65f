//! 经济审计日志
//!
//! 只追加写入，与余额变更在同一工作单元内提交

use chrono::Utc;
use tracing::info;

use ledger_shared::observability::metrics;

use crate::error::Result;
use crate::models::{AuditEvent, GrantAuditMetadata, make_id};
use crate::repository::LedgerTx;

/// 货币入账的实体类型与事件类型
pub const ENTITY_TYPE_CURRENCY: &str = "currency";
pub const EVENT_TYPE_CURRENCY_CREDIT: &str = "currency.credit";

/// 一次入账的审计信息
#[derive(Debug, Clone)]
pub struct CreditAuditEntry {
    pub user_id: String,
    pub metadata: GrantAuditMetadata,
    pub request_id: Option<String>,
    pub idempotency_key: Option<String>,
}

/// 审计记录器
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    /// 在当前工作单元中追加一条入账审计事件
    ///
    /// 追加失败时返回错误，由调用方回滚整个工作单元
    pub async fn append_credit(
        &self,
        tx: &mut dyn LedgerTx,
        entry: CreditAuditEntry,
    ) -> Result<AuditEvent> {
        let event = AuditEvent {
            id: make_id("audit"),
            actor_user_id: Some(entry.user_id.clone()),
            target_user_id: entry.user_id.clone(),
            entity_type: ENTITY_TYPE_CURRENCY.to_string(),
            entity_id: Some(entry.user_id),
            event_type: EVENT_TYPE_CURRENCY_CREDIT.to_string(),
            request_id: entry.request_id,
            idempotency_key: entry.idempotency_key,
            metadata: serde_json::to_value(&entry.metadata)?,
            created_at: Utc::now(),
        };

        tx.append_audit_event(&event).await?;

        info!(
            audit_id = %event.id,
            user_id = %event.target_user_id,
            reason = entry.metadata.reason.as_str(),
            tier = %entry.metadata.tier,
            hidden = entry.metadata.hidden,
            souls = entry.metadata.souls,
            gem_dust = entry.metadata.gem_dust,
            blood_gems = entry.metadata.blood_gems,
            "经济审计事件已追加"
        );
        metrics::record_audit_event(entry.metadata.reason.as_str());

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::models::{AchievementTier, CurrencyAmounts};
    use crate::repository::MockLedgerTx;

    fn entry() -> CreditAuditEntry {
        CreditAuditEntry {
            user_id: "u1".to_string(),
            metadata: GrantAuditMetadata::achievement_unlock(
                AchievementTier::Silver,
                true,
                &CurrencyAmounts::new(1000, 30, 0),
            ),
            request_id: Some("req-1".to_string()),
            idempotency_key: Some("achievement_unlock:u1:a1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_append_credit_event_shape() {
        let mut tx = MockLedgerTx::new();
        tx.expect_append_audit_event()
            .withf(|event| {
                event.target_user_id == "u1"
                    && event.actor_user_id.as_deref() == Some("u1")
                    && event.entity_type == "currency"
                    && event.event_type == "currency.credit"
                    && event.metadata["reason"] == "achievement_unlock"
                    && event.metadata["gemDust"] == 30
            })
            .times(1)
            .returning(|_| Ok(()));

        let event = AuditLogger::new()
            .append_credit(&mut tx, entry())
            .await
            .unwrap();
        assert!(event.id.starts_with("audit_"));
        assert_eq!(event.request_id.as_deref(), Some("req-1"));

        let metadata = event.grant_metadata().unwrap();
        assert_eq!(metadata.tier, AchievementTier::Silver);
        assert!(metadata.hidden);
        assert_eq!(metadata.souls, 1000);
    }

    #[tokio::test]
    async fn test_append_failure_propagates() {
        let mut tx = MockLedgerTx::new();
        tx.expect_append_audit_event()
            .returning(|_| Err(LedgerError::Internal("disk full".to_string())));

        let result = AuditLogger::new().append_credit(&mut tx, entry()).await;
        assert!(result.is_err());
    }
}
