//! 账本枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use std::fmt;

use serde::{Deserialize, Serialize};

/// 成就奖励档位
///
/// 决定解锁成就时发放的基础奖励
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum AchievementTier {
    #[default]
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl AchievementTier {
    pub const ALL: [AchievementTier; 4] = [Self::Bronze, Self::Silver, Self::Gold, Self::Platinum];

    /// 解析档位字符串，忽略大小写与首尾空白
    ///
    /// 未知档位返回 `None`，由调用方决定回退策略
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bronze" => Some(Self::Bronze),
            "silver" => Some(Self::Silver),
            "gold" => Some(Self::Gold),
            "platinum" => Some(Self::Platinum),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
        }
    }
}

impl fmt::Display for AchievementTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 审计事件原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReason {
    AchievementUnlock,
}

impl AuditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AchievementUnlock => "achievement_unlock",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse() {
        assert_eq!(AchievementTier::parse("gold"), Some(AchievementTier::Gold));
        assert_eq!(AchievementTier::parse(" Platinum "), Some(AchievementTier::Platinum));
        assert_eq!(AchievementTier::parse("diamond"), None);
        assert_eq!(AchievementTier::parse(""), None);
    }

    #[test]
    fn test_tier_serde() {
        let json = serde_json::to_string(&AchievementTier::Silver).unwrap();
        assert_eq!(json, "\"silver\"");

        let tier: AchievementTier = serde_json::from_str("\"platinum\"").unwrap();
        assert_eq!(tier, AchievementTier::Platinum);
        assert_eq!(AchievementTier::default(), AchievementTier::Bronze);
    }

    #[test]
    fn test_audit_reason() {
        let json = serde_json::to_string(&AuditReason::AchievementUnlock).unwrap();
        assert_eq!(json, "\"achievement_unlock\"");
        assert_eq!(AuditReason::AchievementUnlock.as_str(), "achievement_unlock");
    }
}
