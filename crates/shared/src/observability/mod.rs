//! 统一可观测性模块
//!
//! 提供 logging 和 metrics 的统一初始化。
//! 所有进程通过单一入口点配置可观测性，确保一致的日志格式和指标命名。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;

use crate::config::ObservabilityConfig;

/// 可观测性资源守卫
///
/// 持有指标服务器的生命周期，被 drop 时记录关闭日志。
pub struct ObservabilityGuard {
    _metrics_handle: Option<metrics::MetricsHandle>,
}

impl ObservabilityGuard {
    /// 创建一个空的 Guard（用于测试或禁用可观测性时）
    pub fn empty() -> Self {
        Self {
            _metrics_handle: None,
        }
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("Shutting down observability...");
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（结构化日志）
/// 2. Metrics（Prometheus 指标，可通过配置关闭）
///
/// # Example
///
/// ```ignore
/// use offer_shared::{config::AppConfig, observability};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::load("offer-engine")?;
///     let _guard = observability::init(&config.service_name, &config.observability).await?;
///     Ok(())
/// }
/// ```
pub async fn init(service_name: &str, config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;

    info!(
        service = %service_name,
        log_format = %config.log_format,
        metrics_enabled = config.metrics_enabled,
        metrics_port = config.metrics_port,
        "Observability initialized"
    );

    let metrics_handle = if config.metrics_enabled {
        Some(metrics::init(service_name, config).await?)
    } else {
        None
    };

    Ok(ObservabilityGuard {
        _metrics_handle: metrics_handle,
    })
}
