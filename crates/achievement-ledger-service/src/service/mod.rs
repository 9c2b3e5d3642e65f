//! 服务层
//!
//! 实现成就解锁业务逻辑，协调奖励解析、持久化、幂等与审计。
//!
//! ## 模块结构
//!
//! - `dto`: 数据传输对象定义
//! - `unlock_service`: 成就解锁与余额查询

pub mod dto;
pub mod unlock_service;

pub use dto::*;
pub use unlock_service::{UNLOCK_SCOPE, UnlockService, unlock_idempotency_key};
