//! 引擎专用错误类型
//!
//! 在共享库 OfferError 基础上增加启动阶段的失败。运行期的单条消息错误
//! （解码失败、写库失败、发布失败）不会以错误形式向上传播，只记录日志和指标。

use offer_shared::error::OfferError;

/// 引擎错误
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// 启动阶段无法继续（规则存储不可用、配置非法等），进程应退出
    #[error("引擎启动失败: {0}")]
    StartupFailed(String),

    /// 透传共享库错误
    #[error(transparent)]
    Shared(#[from] OfferError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
