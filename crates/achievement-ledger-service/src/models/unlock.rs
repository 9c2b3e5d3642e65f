//! 成就解锁记录模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::AchievementTier;

/// 成就解锁记录
///
/// 创建后不可变；每个 (user_id, achievement_id) 至多一条，存储层有唯一约束兜底
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AchievementUnlock {
    pub id: String,
    pub user_id: String,
    pub achievement_id: String,
    pub tier: AchievementTier,
    pub hidden: bool,
    pub unlocked_at: DateTime<Utc>,
}

impl AchievementUnlock {
    pub fn new(
        user_id: impl Into<String>,
        achievement_id: impl Into<String>,
        tier: AchievementTier,
        hidden: bool,
    ) -> Self {
        Self {
            id: super::make_id("ach"),
            user_id: user_id.into(),
            achievement_id: achievement_id.into(),
            tier,
            hidden,
            unlocked_at: Utc::now(),
        }
    }
}
