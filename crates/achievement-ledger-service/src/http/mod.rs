//! HTTP 接口层
//!
//! - `routes`: 路由与中间件
//! - `handlers`: 请求处理器
//! - `state`: 共享状态
//! - `error`: 错误响应映射

mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use handlers::ApiResponse;
pub use routes::{api_routes, create_router};
pub use state::AppState;
