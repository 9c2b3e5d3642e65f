//! 用户余额模型

use serde::{Deserialize, Serialize};

/// 三种游戏货币的数量组合
///
/// 同时用于表示奖励增量和余额快照，所有分量非负
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyAmounts {
    pub souls: i64,
    #[serde(alias = "gem_dust")]
    pub gem_dust: i64,
    #[serde(alias = "blood_gems")]
    pub blood_gems: i64,
}

impl CurrencyAmounts {
    pub const ZERO: CurrencyAmounts = CurrencyAmounts {
        souls: 0,
        gem_dust: 0,
        blood_gems: 0,
    };

    pub const fn new(souls: i64, gem_dust: i64, blood_gems: i64) -> Self {
        Self {
            souls,
            gem_dust,
            blood_gems,
        }
    }

    /// 各分量相加，任一分量溢出时返回 `None`
    pub fn checked_add(&self, other: &CurrencyAmounts) -> Option<CurrencyAmounts> {
        Some(Self {
            souls: self.souls.checked_add(other.souls)?,
            gem_dust: self.gem_dust.checked_add(other.gem_dust)?,
            blood_gems: self.blood_gems.checked_add(other.blood_gems)?,
        })
    }

    /// 各分量乘以同一倍数（饱和乘法）
    pub fn saturating_mul(&self, factor: i64) -> CurrencyAmounts {
        Self {
            souls: self.souls.saturating_mul(factor),
            gem_dust: self.gem_dust.saturating_mul(factor),
            blood_gems: self.blood_gems.saturating_mul(factor),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn is_non_negative(&self) -> bool {
        self.souls >= 0 && self.gem_dust >= 0 && self.blood_gems >= 0
    }
}

/// 用户余额
///
/// 账户由外部系统创建，本服务只做增量入账
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserBalance {
    pub id: String,
    pub souls: i64,
    pub gem_dust: i64,
    pub blood_gems: i64,
}

impl UserBalance {
    pub fn new(id: impl Into<String>, amounts: CurrencyAmounts) -> Self {
        Self {
            id: id.into(),
            souls: amounts.souls,
            gem_dust: amounts.gem_dust,
            blood_gems: amounts.blood_gems,
        }
    }

    pub fn amounts(&self) -> CurrencyAmounts {
        CurrencyAmounts::new(self.souls, self.gem_dust, self.blood_gems)
    }
}
