//! 投注流消费循环
//!
//! 逐条拉取投注消息交给 `BetProcessor`，处理完成后无条件提交位点：
//! 解码失败、未命中、写库失败、发布失败都不会让位点停留，同一条消息不会被本进程重试。
//!
//! 读取失败（broker 不可达等）记录日志并固定退避后重试，不设上限。

use std::time::Instant;

use offer_shared::kafka::MessageSource;
use offer_shared::observability::metrics as engine_metrics;
use offer_shared::retry::FixedBackoff;
use offer_shared::shutdown;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::award_sink::AwardOutcome;
use crate::processor::{BetProcessor, ProcessOutcome};

/// 消费循环退出时的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub consumed: u64,
    pub malformed: u64,
    pub unmatched: u64,
    pub awarded: u64,
    pub read_errors: u64,
    pub commit_errors: u64,
}

impl LoopStats {
    fn record(&mut self, outcome: &ProcessOutcome) {
        self.consumed += 1;
        match outcome {
            ProcessOutcome::Malformed { .. } => self.malformed += 1,
            ProcessOutcome::Unmatched => self.unmatched += 1,
            ProcessOutcome::Awarded(
                AwardOutcome::Published { .. } | AwardOutcome::PublishFailed { .. },
            ) => self.awarded += 1,
            ProcessOutcome::Awarded(_) => {}
        }
    }
}

/// 投注流消费者
///
/// 组合消息源（拉取/提交）与投注处理器（业务处理），形成完整的消费管道。
pub struct BetConsumer<S> {
    source: S,
    processor: BetProcessor,
    backoff: FixedBackoff,
}

impl<S: MessageSource> BetConsumer<S> {
    pub fn new(source: S, processor: BetProcessor, backoff: FixedBackoff) -> Self {
        Self {
            source,
            processor,
            backoff,
        }
    }

    /// 启动消费循环，直到收到关闭信号
    ///
    /// 正在处理的消息会完整走完处理与提交后再退出。
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> LoopStats {
        let mut stats = LoopStats::default();
        info!(cache_size = self.processor.cache().len(), "投注消费者已启动");

        loop {
            let fetched = tokio::select! {
                biased;

                _ = shutdown::wait(&mut stop) => break,
                fetched = self.source.fetch() => fetched,
            };

            let msg = match fetched {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, retryable = e.is_retryable(), "读取投注流失败，退避后重试");
                    stats.read_errors += 1;
                    engine_metrics::record_stream_read_error("bets");
                    if self.backoff.wait(&mut stop).await {
                        break;
                    }
                    continue;
                }
            };

            engine_metrics::record_bet_consumed();
            let start = Instant::now();

            let outcome = self.processor.process(&msg).await;
            stats.record(&outcome);

            if let Err(e) = self.source.commit(&msg).await {
                error!(
                    error = %e,
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    "提交投注流位点失败"
                );
                stats.commit_errors += 1;
                engine_metrics::record_commit_error();
            }

            engine_metrics::record_bet_duration(start.elapsed().as_secs_f64());
            debug!(
                partition = msg.partition,
                offset = msg.offset,
                outcome = outcome.as_str(),
                "投注处理完成"
            );
        }

        info!(
            consumed = stats.consumed,
            malformed = stats.malformed,
            unmatched = stats.unmatched,
            awarded = stats.awarded,
            read_errors = stats.read_errors,
            "投注消费者已停止"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::award_sink::AwardSink;
    use crate::models::Rule;
    use crate::rule_cache::RuleCache;
    use crate::test_utils::{
        InMemoryAwardStore, InMemorySource, RecordingPublisher, SourceStep, bet_message,
        raw_message,
    };
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    fn processor(store: Arc<InMemoryAwardStore>, publisher: Arc<RecordingPublisher>) -> BetProcessor {
        let (_tx, rx) = mpsc::channel(16);
        BetProcessor::new(
            RuleCache::from_active_rules(vec![Rule::new(1, dec!(10), dec!(0.10), true)]),
            rx,
            AwardSink::new(store, publisher, true),
        )
    }

    #[tokio::test]
    async fn test_every_message_is_committed() {
        let store = Arc::new(InMemoryAwardStore::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let (stop_tx, stop_rx) = watch::channel(false);

        let source = InMemorySource::new(vec![
            SourceStep::Message(bet_message(0, "e1", "u1", 50.0)),
            SourceStep::Message(raw_message("events.bet_qualified", 1, "garbage")),
            SourceStep::Message(bet_message(2, "e2", "u1", 5.0)),
        ])
        .stop_when_drained(stop_tx);
        let commits = source.commits();

        let stats = BetConsumer::new(source, processor(store.clone(), publisher.clone()), FixedBackoff::default())
            .run(stop_rx)
            .await;

        assert_eq!(commits.lock().clone(), vec![(0, 0), (0, 1), (0, 2)]);
        assert_eq!(stats.consumed, 3);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.awarded, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_still_commits() {
        let store = Arc::new(InMemoryAwardStore::new());
        store.set_failing(true);
        let publisher = Arc::new(RecordingPublisher::new());
        let (stop_tx, stop_rx) = watch::channel(false);

        let source = InMemorySource::new(vec![SourceStep::Message(bet_message(0, "e1", "u1", 50.0))])
            .stop_when_drained(stop_tx);
        let commits = source.commits();

        let stats = BetConsumer::new(source, processor(store, publisher.clone()), FixedBackoff::default())
            .run(stop_rx)
            .await;

        assert_eq!(commits.lock().clone(), vec![(0, 0)]);
        assert_eq!(stats.awarded, 0);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_waits_one_second_then_retries() {
        let store = Arc::new(InMemoryAwardStore::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let (stop_tx, stop_rx) = watch::channel(false);

        let source = InMemorySource::new(vec![
            SourceStep::ReadError("broker 不可达".to_string()),
            SourceStep::Message(bet_message(0, "e1", "u1", 50.0)),
        ])
        .stop_when_drained(stop_tx);

        let start = tokio::time::Instant::now();
        let stats = BetConsumer::new(source, processor(store.clone(), publisher), FixedBackoff::default())
            .run(stop_rx)
            .await;

        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(stats.read_errors, 1);
        assert_eq!(stats.awarded, 1);
        assert!(store.get("e1").is_some());
    }

    #[tokio::test]
    async fn test_stops_immediately_when_already_shut_down() {
        let store = Arc::new(InMemoryAwardStore::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let (_stop_tx, stop_rx) = watch::channel(true);

        let source = InMemorySource::new(vec![SourceStep::Message(bet_message(0, "e1", "u1", 50.0))]);
        let commits = source.commits();

        let stats = BetConsumer::new(source, processor(store, publisher), FixedBackoff::default())
            .run(stop_rx)
            .await;

        assert_eq!(stats, LoopStats::default());
        assert!(commits.lock().is_empty());
    }
}
