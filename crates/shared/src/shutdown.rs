//! 关闭信号
//!
//! 基于 `watch` channel 的进程级关闭信号：值变为 `true` 即表示应当退出。
//! 发送端被丢弃时同样视为关闭，避免读循环在无人通知的情况下空转。

use tokio::sync::watch;
use tracing::{info, warn};

/// 创建关闭信号，并在后台监听 Ctrl-C / SIGTERM
pub fn install() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    let signal_tx = tx.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("收到终止信号，开始优雅关闭");
        let _ = signal_tx.send(true);
    });

    (tx, rx)
}

/// 等待关闭信号变为 `true`
pub async fn wait(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "注册 SIGTERM 监听失败，仅监听 Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
