//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 未安装 recorder 时（如单元测试），记录函数为空操作。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_ledger_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册账本相关指标描述
fn register_ledger_metrics(service_name: &str) {
    metrics::describe_counter!(
        "achievement_unlocks_total",
        "Total number of achievement unlock requests by outcome"
    );
    metrics::describe_histogram!(
        "achievement_unlock_duration_seconds",
        "Achievement unlock duration in seconds"
    );
    metrics::describe_counter!(
        "idempotency_replays_total",
        "Total number of replayed idempotent mutations"
    );
    metrics::describe_counter!("audit_events_total", "Total number of appended audit events");
    metrics::describe_counter!(
        "reward_tier_fallbacks_total",
        "Unknown reward tiers resolved to the default tier"
    );
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_secs);
}

/// 记录成就解锁
///
/// outcome 取值：granted / already_unlocked / replayed / failed
#[inline]
pub fn record_achievement_unlock(outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "achievement_unlocks_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "achievement_unlock_duration_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

/// 记录幂等重放
#[inline]
pub fn record_idempotency_replay(scope: &str) {
    metrics::counter!("idempotency_replays_total", "scope" => scope.to_string()).increment(1);
}

/// 记录审计事件写入
#[inline]
pub fn record_audit_event(reason: &str) {
    metrics::counter!("audit_events_total", "reason" => reason.to_string()).increment(1);
}

/// 记录未知奖励档位回退
#[inline]
pub fn record_tier_fallback() {
    metrics::counter!("reward_tier_fallbacks_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_recorder_is_noop() {
        record_achievement_unlock("granted", 0.01);
        record_idempotency_replay("achievement.unlock");
        record_audit_event("achievement_unlock");
        record_tier_fallback();
        record_http_request("GET", "/health", 200, 0.001);
        assert!(get_handle().is_none());
    }
}
