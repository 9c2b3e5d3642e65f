//! 账本 API 处理器

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use ledger_shared::observability::middleware::RequestId;

use super::state::AppState;
use crate::error::{LedgerError, Result};
use crate::service::{BalancesDto, UnlockAchievementRequest, UnlockOutcome, UserAchievementsDto};

/// 统一成功响应：`{success: true, ...data}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// 解锁请求体，字段均可省略
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockBody {
    pub tier: Option<String>,
    pub hidden: Option<bool>,
}

impl UnlockBody {
    /// 空请求体视为全部缺省
    fn parse(body: &Bytes) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| LedgerError::Validation(format!("请求体格式错误: {}", e)))
    }
}

/// 解锁成就
///
/// POST /api/v1/users/{user_id}/achievements/{achievement_id}/unlock
///
/// 首次执行返回 201，重放返回 200
pub async fn unlock_achievement(
    State(state): State<AppState>,
    Path((user_id, achievement_id)): Path<(String, String)>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<UnlockOutcome>>)> {
    let body = UnlockBody::parse(&body)?;

    let mut request =
        UnlockAchievementRequest::new(user_id, achievement_id).with_request_id(request_id.0);
    request.tier = body.tier;
    request.hidden = body.hidden;

    let outcome = state.unlock_service.unlock_achievement(request).await?;
    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((status, Json(ApiResponse::success(outcome))))
}

/// 查询用户余额
///
/// GET /api/v1/users/{user_id}/balances
pub async fn get_balances(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<BalancesDto>>> {
    let balances = state.unlock_service.get_balances(&user_id).await?;
    Ok(Json(ApiResponse::success(balances)))
}

/// 查询用户已解锁成就
///
/// GET /api/v1/users/{user_id}/achievements
pub async fn list_achievements(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<UserAchievementsDto>>> {
    let achievements = state.unlock_service.list_unlocks(&user_id).await?;
    Ok(Json(ApiResponse::success(achievements)))
}

/// 健康检查
///
/// 配置了数据库时执行 `SELECT 1`，失败返回 503
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let storage = if state.unlock_service.is_transactional() {
        "postgres"
    } else {
        "memory"
    };

    let mut body = json!({
        "status": "ok",
        "service": "achievement-ledger",
        "storage": storage,
    });

    let Some(database) = &state.database else {
        return (StatusCode::OK, Json(body));
    };

    match database.health_check().await {
        Ok(()) => {
            body["database"] = json!("ok");
            (StatusCode::OK, Json(body))
        }
        Err(e) => {
            warn!(error = %e, "数据库健康检查失败");
            body["status"] = json!("degraded");
            body["database"] = json!("unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, Json(body))
        }
    }
}
