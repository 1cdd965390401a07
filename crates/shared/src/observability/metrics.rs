//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述（出现在 /metrics 的 HELP 注释中）
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "orders_consumed_total",
        "Kafka order messages handled, by outcome"
    );
    metrics::describe_histogram!(
        "order_persist_duration_seconds",
        "Time spent persisting one order aggregate"
    );
    metrics::describe_counter!("orders_published_total", "Order publish attempts, by status");
    metrics::describe_counter!(
        "consumer_session_restarts_total",
        "Consumer group sessions restarted after a broker error"
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

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一条消费消息的处理结果
///
/// outcome: persisted / malformed / rejected / failed
#[inline]
pub fn record_order_consumed(outcome: &str) {
    metrics::counter!("orders_consumed_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录一次订单持久化耗时
#[inline]
pub fn record_order_persist(backend: &str, status: &str, duration_secs: f64) {
    metrics::histogram!(
        "order_persist_duration_seconds",
        "backend" => backend.to_string(),
        "status" => status.to_string()
    )
    .record(duration_secs);
}

/// 记录一次订单发布
#[inline]
pub fn record_order_published(status: &str) {
    metrics::counter!("orders_published_total", "status" => status.to_string()).increment(1);
}

/// 记录一次消费会话重启
#[inline]
pub fn record_session_restart() {
    metrics::counter!("consumer_session_restarts_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_order_consumed("persisted");
        record_order_consumed("malformed");
        record_order_persist("memory", "success", 0.001);
        record_order_published("success");
        record_session_restart();
    }
}
