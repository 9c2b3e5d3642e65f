//! 账本服务错误类型
//!
//! 定义服务层的业务错误和系统错误。
//! 重复解锁不是错误，以 `already_unlocked = true` 的正常响应返回。

use thiserror::Error;

/// 账本服务错误类型
#[derive(Debug, Error)]
pub enum LedgerError {
    // === 业务错误 ===
    #[error("用户不存在: {0}")]
    UserNotFound(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("幂等键已用于不同的请求: scope={scope}, key={key}")]
    IdempotencyPayloadMismatch { scope: String, key: String },

    #[error("余额溢出: user_id={0}")]
    BalanceOverflow(String),

    // === 内部信号 ===
    /// 并发重复请求在写入幂等记录时撞上唯一约束，由幂等协调器吸收并转为重放
    #[error("幂等键冲突: scope={scope}, key={key}")]
    IdempotencyConflict { scope: String, key: String },

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 账本服务 Result 类型别名
pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    /// 检查是否为可重试的错误
    ///
    /// 事务失败时不会提交任何写入，重试总是安全的
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::IdempotencyConflict { .. })
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            Self::UserNotFound(_)
                | Self::Validation(_)
                | Self::IdempotencyPayloadMismatch { .. }
                | Self::BalanceOverflow(_)
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::IdempotencyPayloadMismatch { .. } => "IDEMPOTENCY_PAYLOAD_MISMATCH",
            Self::BalanceOverflow(_) => "BALANCE_OVERFLOW",
            Self::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// 判断 sqlx 错误是否为唯一约束冲突（SQLSTATE 23505）
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
