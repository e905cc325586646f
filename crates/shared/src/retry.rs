//! 固定退避策略
//!
//! 读循环遇到瞬时传输错误（broker 不可达、连接断开等）时，等待固定时间后继续，
//! 不设重试上限，也不做熔断。等待期间响应关闭信号，保证进程能及时退出。

use std::time::Duration;

use tokio::sync::watch;

use crate::shutdown;

/// 默认退避时间
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// 固定退避
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    delay: Duration,
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self {
            delay: DEFAULT_BACKOFF,
        }
    }
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// 等待一个退避周期
    ///
    /// 返回 `true` 表示等待期间收到了关闭信号，调用方应退出循环。
    pub async fn wait(&self, stop: &mut watch::Receiver<bool>) -> bool {
        if *stop.borrow() {
            return true;
        }

        tokio::select! {
            biased;

            _ = shutdown::wait(stop) => true,
            _ = tokio::time::sleep(self.delay) => false,
        }
    }
}
