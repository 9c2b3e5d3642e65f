//! 幂等记录模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 幂等记录
///
/// 首次执行成功后与业务写入同一事务提交，(scope, idempotency_key) 唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub id: String,
    pub scope: String,
    pub idempotency_key: String,
    /// 请求载荷指纹（SHA-256 十六进制），用于识别键复用
    pub request_hash: Option<String>,
    pub response_body: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(
        scope: impl Into<String>,
        idempotency_key: impl Into<String>,
        request_hash: Option<String>,
        response_body: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: super::make_id("idem"),
            scope: scope.into(),
            idempotency_key: idempotency_key.into(),
            request_hash,
            response_body,
            created_at: now,
            last_seen_at: now,
        }
    }
}
