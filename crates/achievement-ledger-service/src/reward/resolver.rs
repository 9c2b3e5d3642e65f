//! 奖励档位解析器
//!
//! 纯函数：(tier, hidden) -> 奖励数量。未知档位回退为 bronze 并记录告警。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use ledger_shared::observability::metrics;

use super::table::{HIDDEN_MULTIPLIER, RewardTable};
use crate::models::{AchievementTier, CurrencyAmounts};

/// 奖励附加信息（用于响应展示）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardMeta {
    pub tier: AchievementTier,
    pub hidden: bool,
    pub multiplier: i64,
}

impl RewardMeta {
    pub fn new(tier: AchievementTier, hidden: bool) -> Self {
        Self {
            tier,
            hidden,
            multiplier: if hidden { HIDDEN_MULTIPLIER } else { 1 },
        }
    }
}

/// 解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedReward {
    pub reward: CurrencyAmounts,
    pub meta: RewardMeta,
}

/// 奖励档位解析器
#[derive(Debug, Clone)]
pub struct RewardTierResolver {
    table: Arc<RewardTable>,
}

impl Default for RewardTierResolver {
    fn default() -> Self {
        Self::new(Arc::new(RewardTable::default()))
    }
}

impl RewardTierResolver {
    pub fn new(table: Arc<RewardTable>) -> Self {
        Self { table }
    }

    /// 按确定的档位解析奖励
    pub fn resolve(&self, tier: AchievementTier, hidden: bool) -> ResolvedReward {
        let meta = RewardMeta::new(tier, hidden);
        let reward = self.table.base(tier).saturating_mul(meta.multiplier);
        ResolvedReward { reward, meta }
    }

    /// 解析调用方传入的档位字符串
    ///
    /// 缺省为 bronze；未知值同样回退 bronze，属于配置告警而非错误
    pub fn requested_tier(tier: Option<&str>) -> AchievementTier {
        match tier {
            None => AchievementTier::default(),
            Some(raw) => AchievementTier::parse(raw).unwrap_or_else(|| {
                warn!(tier = %raw, "未知的成就奖励档位，回退为 bronze");
                metrics::record_tier_fallback();
                AchievementTier::default()
            }),
        }
    }

    /// 解析调用方传入的原始元数据
    pub fn resolve_requested(&self, tier: Option<&str>, hidden: Option<bool>) -> ResolvedReward {
        self.resolve(Self::requested_tier(tier), hidden.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_all_tiers() {
        let resolver = RewardTierResolver::default();
        let expected = [
            (AchievementTier::Bronze, CurrencyAmounts::new(100, 5, 0)),
            (AchievementTier::Silver, CurrencyAmounts::new(500, 15, 0)),
            (AchievementTier::Gold, CurrencyAmounts::new(2000, 0, 50)),
            (AchievementTier::Platinum, CurrencyAmounts::new(10000, 0, 200)),
        ];

        for (tier, base) in expected {
            let visible = resolver.resolve(tier, false);
            assert_eq!(visible.reward, base, "tier {}", tier);
            assert_eq!(visible.meta.multiplier, 1);

            let hidden = resolver.resolve(tier, true);
            assert_eq!(hidden.reward, base.saturating_mul(2), "hidden tier {}", tier);
            assert_eq!(hidden.meta.multiplier, 2);
            assert!(hidden.meta.hidden);
        }
    }

    #[test]
    fn test_missing_tier_defaults_to_bronze() {
        let resolver = RewardTierResolver::default();
        let resolved = resolver.resolve_requested(None, None);
        assert_eq!(resolved.meta.tier, AchievementTier::Bronze);
        assert!(!resolved.meta.hidden);
        assert_eq!(resolved.reward, CurrencyAmounts::new(100, 5, 0));
    }

    #[test]
    fn test_unknown_tier_falls_back_to_bronze() {
        let resolver = RewardTierResolver::default();
        let resolved = resolver.resolve_requested(Some("mythic"), Some(true));
        assert_eq!(resolved.meta.tier, AchievementTier::Bronze);
        assert_eq!(resolved.reward, CurrencyAmounts::new(200, 10, 0));
    }

    #[test]
    fn test_custom_table_is_used() {
        let table = RewardTable {
            gold: CurrencyAmounts::new(1, 2, 3),
            ..Default::default()
        };
        let resolver = RewardTierResolver::new(Arc::new(table));
        let resolved = resolver.resolve_requested(Some("GOLD"), None);
        assert_eq!(resolved.reward, CurrencyAmounts::new(1, 2, 3));
    }

    #[test]
    fn test_reward_meta_serialization() {
        let json = serde_json::to_value(RewardMeta::new(AchievementTier::Gold, true)).unwrap();
        assert_eq!(json["tier"], "gold");
        assert_eq!(json["hidden"], true);
        assert_eq!(json["multiplier"], 2);
    }
}
