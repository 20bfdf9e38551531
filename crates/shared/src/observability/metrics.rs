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

use crate::config::ObservabilityConfig;

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
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(config: &ObservabilityConfig, service_name: &str) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "point_decrements_total",
        "Total number of point decrement calls by level and outcome"
    );
    metrics::describe_counter!(
        "point_cas_conflicts_total",
        "Conditional writes that lost the race to a concurrent writer"
    );
    metrics::describe_histogram!(
        "point_decrement_attempts",
        "Read/write rounds needed by one decrement call"
    );
    metrics::describe_counter!(
        "point_orders_total",
        "Total number of processed order events by outcome"
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
// 便捷的指标记录函数
// ============================================================================

/// 记录一次积分扣减调用
#[inline]
pub fn record_decrement(level: &str, outcome: &str, attempts: u32) {
    metrics::counter!(
        "point_decrements_total",
        "level" => level.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "point_decrement_attempts",
        "level" => level.to_string()
    )
    .record(attempts as f64);
}

/// 记录一次乐观锁冲突
#[inline]
pub fn record_cas_conflict(level: &str) {
    metrics::counter!(
        "point_cas_conflicts_total",
        "level" => level.to_string()
    )
    .increment(1);
}

/// 记录一条订单事件的处理结果
#[inline]
pub fn record_order(outcome: &str) {
    metrics::counter!(
        "point_orders_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
