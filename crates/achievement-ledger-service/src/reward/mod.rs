//! 成就奖励模块
//!
//! - `table`: 档位奖励表（可配置，默认冻结值）
//! - `resolver`: 档位解析器

mod resolver;
mod table;

pub use resolver::{ResolvedReward, RewardMeta, RewardTierResolver};
pub use table::{HIDDEN_MULTIPLIER, RewardTable};
