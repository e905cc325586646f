//! 规则更新消费者
//!
//! 持续从规则流拉取规则变更，解码后通过有界队列交给处理循环。
//!
//! - 解码失败：记录日志后丢弃，不阻塞后续消息
//! - 读取失败：固定退避后重试，不设上限
//! - 队列已满：阻塞等待处理循环取走，对规则传播形成背压，不影响投注吞吐
//!
//! 规则消息在成功入队后才提交位点。

use offer_shared::error::Result;
use offer_shared::kafka::{ConsumerMessage, MessageSource};
use offer_shared::observability::metrics as engine_metrics;
use offer_shared::retry::FixedBackoff;
use offer_shared::shutdown;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::models::RuleEvent;

/// 解码并校验一条规则更新消息
pub fn decode_rule_event(msg: &ConsumerMessage) -> Result<RuleEvent> {
    let event: RuleEvent = msg.deserialize_payload()?;
    event.rule.validate()?;
    Ok(event)
}

/// 规则更新消费者
pub struct RuleUpdateIngestor<S> {
    source: S,
    tx: mpsc::Sender<RuleEvent>,
    backoff: FixedBackoff,
}

impl<S: MessageSource> RuleUpdateIngestor<S> {
    pub fn new(source: S, tx: mpsc::Sender<RuleEvent>, backoff: FixedBackoff) -> Self {
        Self {
            source,
            tx,
            backoff,
        }
    }

    /// 运行消费循环，直到收到关闭信号或处理循环已退出
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!("规则更新消费者已启动");

        loop {
            let fetched = tokio::select! {
                biased;

                _ = shutdown::wait(&mut stop) => break,
                fetched = self.source.fetch() => fetched,
            };

            let msg = match fetched {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, retryable = e.is_retryable(), "读取规则流失败，退避后重试");
                    engine_metrics::record_stream_read_error("rules");
                    if self.backoff.wait(&mut stop).await {
                        break;
                    }
                    continue;
                }
            };

            match decode_rule_event(&msg) {
                Ok(event) => {
                    debug!(
                        rule_id = event.rule.id,
                        event_type = %event.event_type,
                        offset = msg.offset,
                        "收到规则更新"
                    );

                    // 队列满时在此阻塞；等待期间仍需响应关闭信号
                    let sent = tokio::select! {
                        biased;

                        _ = shutdown::wait(&mut stop) => break,
                        sent = self.tx.send(event) => sent,
                    };
                    if sent.is_err() {
                        info!("处理循环已退出，规则更新消费者停止");
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        partition = msg.partition,
                        offset = msg.offset,
                        "规则更新消息无法解码，丢弃"
                    );
                    engine_metrics::record_malformed("rules");
                }
            }

            if let Err(e) = self.source.commit(&msg).await {
                error!(
                    error = %e,
                    partition = msg.partition,
                    offset = msg.offset,
                    "提交规则流位点失败"
                );
                engine_metrics::record_commit_error();
            }
        }

        info!("规则更新消费者已停止");
    }
}
