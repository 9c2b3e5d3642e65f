//! 路由配置模块

use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use ledger_shared::observability::middleware as obs_middleware;

use super::{handlers, state::AppState};

/// 账本 API 路由（挂载在 /api/v1 下）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users/{user_id}/achievements/{achievement_id}/unlock",
            post(handlers::unlock_achievement),
        )
        .route("/users/{user_id}/balances", get(handlers::get_balances))
        .route(
            "/users/{user_id}/achievements",
            get(handlers::list_achievements),
        )
}

/// 构建完整应用
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .route("/health", get(handlers::health_check))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}
