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
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_engine_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册引擎指标的描述
///
/// 这些描述会出现在 /metrics 端点的 HELP 注释中
fn register_engine_metrics(service_name: &str) {
    metrics::describe_counter!("offer_bets_consumed_total", "Total number of bet messages fetched");
    metrics::describe_counter!(
        "offer_bets_malformed_total",
        "Bet messages dropped because they could not be decoded"
    );
    metrics::describe_counter!(
        "offer_bets_unmatched_total",
        "Bets that produced no award"
    );
    metrics::describe_counter!(
        "offer_rule_updates_applied_total",
        "Rule update events applied to the rule cache"
    );
    metrics::describe_counter!(
        "offer_rule_updates_malformed_total",
        "Rule update messages dropped because they could not be decoded"
    );
    metrics::describe_counter!("offer_awards_total", "Award attempts by outcome");
    metrics::describe_counter!(
        "offer_stream_read_errors_total",
        "Transport errors while reading a stream"
    );
    metrics::describe_counter!("offer_commit_errors_total", "Failed offset commits");
    metrics::describe_gauge!("offer_rule_cache_size", "Number of rules held in the cache");
    metrics::describe_histogram!(
        "offer_bet_processing_duration_seconds",
        "Time spent handling one bet message, commit included"
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

/// 记录拉取到的投注消息
#[inline]
pub fn record_bet_consumed() {
    metrics::counter!("offer_bets_consumed_total").increment(1);
}

/// 记录无法解码的消息
#[inline]
pub fn record_malformed(stream: &'static str) {
    match stream {
        "rules" => metrics::counter!("offer_rule_updates_malformed_total").increment(1),
        _ => metrics::counter!("offer_bets_malformed_total").increment(1),
    }
}

/// 记录未产生奖励的投注
#[inline]
pub fn record_bet_unmatched() {
    metrics::counter!("offer_bets_unmatched_total").increment(1);
}

/// 记录规则更新结果（inserted / updated / ignored）
#[inline]
pub fn record_rule_update(outcome: &'static str) {
    metrics::counter!("offer_rule_updates_applied_total", "outcome" => outcome).increment(1);
}

/// 记录奖励处理结果（published / store_failed / publish_failed / skipped_duplicate）
#[inline]
pub fn record_award(outcome: &'static str) {
    metrics::counter!("offer_awards_total", "outcome" => outcome).increment(1);
}

/// 记录流读取错误
#[inline]
pub fn record_stream_read_error(stream: &'static str) {
    metrics::counter!("offer_stream_read_errors_total", "stream" => stream).increment(1);
}

/// 记录位点提交失败
#[inline]
pub fn record_commit_error() {
    metrics::counter!("offer_commit_errors_total").increment(1);
}

/// 更新规则缓存大小
#[inline]
pub fn set_rule_cache_size(size: usize) {
    metrics::gauge!("offer_rule_cache_size").set(size as f64);
}

/// 记录单条投注的处理耗时
#[inline]
pub fn record_bet_duration(duration_secs: f64) {
    metrics::histogram!("offer_bet_processing_duration_seconds").record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_bet_consumed();
        record_malformed("bets");
        record_malformed("rules");
        record_bet_unmatched();
        record_rule_update("inserted");
        record_award("published");
        record_stream_read_error("bets");
        record_commit_error();
        set_rule_cache_size(3);
        record_bet_duration(0.002);
    }
}
