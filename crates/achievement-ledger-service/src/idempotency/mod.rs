//! 幂等执行
//!
//! 仅用于事务型存储；简单模式不经过协调器

mod coordinator;

pub use coordinator::{
    IdempotencyCoordinator, IdempotentMutation, IdempotentResult, MutationOutcome, request_hash,
};
