//! 服务层数据传输对象
//!
//! 定义服务层与外部交互使用的 DTO，与内部领域模型解耦

use ledger_shared::observability::middleware::is_valid_request_id;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{LedgerError, Result};
use crate::models::{AchievementUnlock, CurrencyAmounts, UserBalance};
use crate::reward::RewardMeta;

/// 用户 ID / 成就 ID 的最大长度
pub const MAX_ID_LENGTH: usize = 120;

/// 解锁成就请求
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockAchievementRequest {
    pub user_id: String,
    pub achievement_id: String,
    /// 奖励档位，缺省为 bronze
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    /// 是否隐藏成就，缺省为 false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    /// 调用链路 ID，仅写入审计日志
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl UnlockAchievementRequest {
    pub fn new(user_id: impl Into<String>, achievement_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            achievement_id: achievement_id.into(),
            ..Default::default()
        }
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = Some(hidden);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// 校验并规范化 ID（去除首尾空白）
    ///
    /// 请求 ID 只用于审计追踪，不合法时丢弃而不拒绝解锁
    pub fn normalized(mut self) -> Result<Self> {
        self.user_id = normalize_id("userId", &self.user_id)?;
        self.achievement_id = normalize_id("achievementId", &self.achievement_id)?;
        self.request_id = self.request_id.and_then(|id| {
            let trimmed = id.trim();
            if is_valid_request_id(trimmed) {
                Some(trimmed.to_string())
            } else {
                if !trimmed.is_empty() {
                    warn!(length = trimmed.len(), "请求 ID 不合法，审计中不记录");
                }
                None
            }
        });
        Ok(self)
    }
}

/// 校验 ID：去除首尾空白后非空且不超过最大长度
pub fn normalize_id(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::Validation(format!("{} 不能为空", field)));
    }
    if trimmed.chars().count() > MAX_ID_LENGTH {
        return Err(LedgerError::Validation(format!(
            "{} 长度不能超过 {}",
            field, MAX_ID_LENGTH
        )));
    }
    Ok(trimmed.to_string())
}

/// 解锁成就响应
///
/// 重复解锁时 `already_unlocked = true`，奖励为零，余额为当前余额
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockAchievementResponse {
    pub unlocked: bool,
    pub already_unlocked: bool,
    pub reward: CurrencyAmounts,
    pub reward_meta: RewardMeta,
    pub balances: CurrencyAmounts,
}

impl UnlockAchievementResponse {
    pub fn granted(reward: CurrencyAmounts, reward_meta: RewardMeta, balances: CurrencyAmounts) -> Self {
        Self {
            unlocked: true,
            already_unlocked: false,
            reward,
            reward_meta,
            balances,
        }
    }

    pub fn already_unlocked(reward_meta: RewardMeta, balances: CurrencyAmounts) -> Self {
        Self {
            unlocked: false,
            already_unlocked: true,
            reward: CurrencyAmounts::ZERO,
            reward_meta,
            balances,
        }
    }
}

/// 解锁结果（带重放标记）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockOutcome {
    #[serde(flatten)]
    pub response: UnlockAchievementResponse,
    pub replayed: bool,
}

/// 幂等指纹载荷
///
/// 只包含身份字段：同一 (user, achievement) 携带不同档位的重复请求仍按重放处理
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UnlockFingerprint<'a> {
    pub user_id: &'a str,
    pub achievement_id: &'a str,
}

/// 用户余额 DTO
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancesDto {
    pub user_id: String,
    pub balances: CurrencyAmounts,
}

impl From<UserBalance> for BalancesDto {
    fn from(balance: UserBalance) -> Self {
        Self {
            balances: balance.amounts(),
            user_id: balance.id,
        }
    }
}

/// 用户已解锁成就列表 DTO
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAchievementsDto {
    pub user_id: String,
    pub total: usize,
    pub achievements: Vec<AchievementUnlock>,
}
