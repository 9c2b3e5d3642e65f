//! 经济审计事件模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::balance::CurrencyAmounts;
use super::enums::{AchievementTier, AuditReason};

/// 货币入账审计元数据
///
/// 序列化后写入 `economy_audit_log.metadata`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantAuditMetadata {
    pub reason: AuditReason,
    pub tier: AchievementTier,
    pub hidden: bool,
    pub souls: i64,
    pub gem_dust: i64,
    pub blood_gems: i64,
}

impl GrantAuditMetadata {
    pub fn achievement_unlock(tier: AchievementTier, hidden: bool, reward: &CurrencyAmounts) -> Self {
        Self {
            reason: AuditReason::AchievementUnlock,
            tier,
            hidden,
            souls: reward.souls,
            gem_dust: reward.gem_dust,
            blood_gems: reward.blood_gems,
        }
    }
}

/// 审计事件
///
/// 只追加，不修改、不删除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    pub actor_user_id: Option<String>,
    pub target_user_id: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub event_type: String,
    pub request_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// 解析元数据为入账元数据
    pub fn grant_metadata(&self) -> Option<GrantAuditMetadata> {
        serde_json::from_value(self.metadata.clone()).ok()
    }
}
