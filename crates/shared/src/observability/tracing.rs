//! 日志初始化
//!
//! 基于 tracing-subscriber 输出结构化日志，支持 JSON 与人类可读两种格式。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::ObservabilityConfig;

/// 是否输出 JSON 日志
pub fn is_json_format(config: &ObservabilityConfig) -> bool {
    config.log_format.eq_ignore_ascii_case("json")
}

/// 构建环境过滤器
///
/// RUST_LOG 优先于配置文件中的日志级别，两者都无效时回退到 info。
pub fn build_env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化全局日志订阅者
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let fmt_layer = if is_json_format(config) {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(build_env_filter(config))
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
