//! 统一错误处理模块
//!
//! 定义优惠系统中各进程共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum OfferError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    // ==================== 输入错误 ====================
    /// 无法解码的消息负载（坏消息），调用方应丢弃而非重试
    #[error("消息解码失败: {0}")]
    Decode(String),

    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, OfferError>;

impl OfferError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Decode(_) => "DECODE_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为瞬时传输错误
    ///
    /// 读循环对这类错误固定退避后继续；其余错误属于输入或配置问题，重试没有意义。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Kafka(_))
    }
}

impl From<config::ConfigError> for OfferError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
