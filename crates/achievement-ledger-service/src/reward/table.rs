//! 奖励档位表
//!
//! 进程级不可变配置，启动时构造后注入解析器

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::models::{AchievementTier, CurrencyAmounts};

/// 隐藏成就的奖励倍数
pub const HIDDEN_MULTIPLIER: i64 = 2;

/// 档位 -> 基础奖励
///
/// 默认值即线上冻结的奖励表；可通过配置 `[rewards]` 段覆盖
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardTable {
    pub bronze: CurrencyAmounts,
    pub silver: CurrencyAmounts,
    pub gold: CurrencyAmounts,
    pub platinum: CurrencyAmounts,
}

impl Default for RewardTable {
    fn default() -> Self {
        Self {
            bronze: CurrencyAmounts::new(100, 5, 0),
            silver: CurrencyAmounts::new(500, 15, 0),
            gold: CurrencyAmounts::new(2000, 0, 50),
            platinum: CurrencyAmounts::new(10000, 0, 200),
        }
    }
}

impl RewardTable {
    pub fn base(&self, tier: AchievementTier) -> CurrencyAmounts {
        match tier {
            AchievementTier::Bronze => self.bronze,
            AchievementTier::Silver => self.silver,
            AchievementTier::Gold => self.gold,
            AchievementTier::Platinum => self.platinum,
        }
    }

    /// 校验奖励表：所有分量非负，且加倍后不溢出
    pub fn validate(&self) -> Result<()> {
        for tier in AchievementTier::ALL {
            let base = self.base(tier);
            if !base.is_non_negative() {
                return Err(LedgerError::Validation(format!(
                    "奖励档位 {} 存在负数奖励",
                    tier
                )));
            }
            if base.souls.checked_mul(HIDDEN_MULTIPLIER).is_none()
                || base.gem_dust.checked_mul(HIDDEN_MULTIPLIER).is_none()
                || base.blood_gems.checked_mul(HIDDEN_MULTIPLIER).is_none()
            {
                return Err(LedgerError::Validation(format!(
                    "奖励档位 {} 加倍后溢出",
                    tier
                )));
            }
        }
        Ok(())
    }
}
