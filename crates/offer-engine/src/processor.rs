//! 投注处理器
//!
//! 处理单条投注消息的完整流程：
//! 解码 -> 吸收已缓冲的规则更新 -> 匹配择优 -> 奖励落库与发布。
//!
//! 处理器独占规则缓存；规则更新只在处理每条投注前以非阻塞方式批量吸收，
//! 因此一条投注看到的规则集，包含它被处理之前已入队的全部更新。

use offer_shared::kafka::ConsumerMessage;
use offer_shared::observability::metrics as engine_metrics;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, warn};

use crate::award_sink::{AwardOutcome, AwardSink};
use crate::matcher;
use crate::models::{BetEvent, RuleEvent};
use crate::rule_cache::RuleCache;

/// 坏消息日志中负载预览的最大字节数
pub const MALFORMED_PAYLOAD_LOG_BYTES: usize = 512;

/// 单条投注的处理结果
///
/// 无论哪种结果，调用方都应提交该投注的位点。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 消息无法解码或未通过校验，已丢弃
    Malformed { reason: String },
    /// 没有候选规则，或最佳奖励为 0
    Unmatched,
    /// 命中规则，交给奖励落库与发布
    Awarded(AwardOutcome),
}

impl ProcessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed",
            Self::Unmatched => "unmatched",
            Self::Awarded(outcome) => outcome.as_str(),
        }
    }
}

/// 投注处理器
pub struct BetProcessor {
    cache: RuleCache,
    rule_updates: mpsc::Receiver<RuleEvent>,
    sink: AwardSink,
}

impl BetProcessor {
    pub fn new(cache: RuleCache, rule_updates: mpsc::Receiver<RuleEvent>, sink: AwardSink) -> Self {
        engine_metrics::set_rule_cache_size(cache.len());
        Self {
            cache,
            rule_updates,
            sink,
        }
    }

    /// 当前规则缓存（只读）
    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    /// 吸收队列中已缓冲的全部规则更新，不等待新更新
    ///
    /// 返回本次吸收的更新条数。规则消费者已退出（发送端关闭）时照常返回，
    /// 缓存保持最后的状态继续服务。
    pub fn drain_rule_updates(&mut self) -> usize {
        let mut drained = 0;
        loop {
            match self.rule_updates.try_recv() {
                Ok(event) => {
                    drained += 1;
                    let outcome = self.cache.apply(event);
                    engine_metrics::record_rule_update(outcome.map_or("ignored", |o| o.as_str()));
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if drained > 0 {
            debug!(drained, cache_size = self.cache.len(), "已吸收规则更新");
            engine_metrics::set_rule_cache_size(self.cache.len());
        }
        drained
    }

    /// 处理一条投注消息
    pub async fn process(&mut self, msg: &ConsumerMessage) -> ProcessOutcome {
        let bet = match decode_bet(msg) {
            Ok(bet) => bet,
            Err(reason) => {
                warn!(
                    partition = msg.partition,
                    offset = msg.offset,
                    reason = %reason,
                    payload = %msg.payload_preview(MALFORMED_PAYLOAD_LOG_BYTES),
                    "投注消息无法解码，丢弃"
                );
                engine_metrics::record_malformed("bets");
                return ProcessOutcome::Malformed { reason };
            }
        };

        self.drain_rule_updates();

        let Some(selection) = matcher::select_best(bet.stake, self.cache.snapshot()) else {
            debug!(event_id = %bet.event_id, stake = %bet.stake, "没有可用的优惠规则");
            engine_metrics::record_bet_unmatched();
            return ProcessOutcome::Unmatched;
        };

        debug!(
            event_id = %bet.event_id,
            rule_id = selection.rule_id,
            bonus_amount = %selection.bonus_amount,
            "投注命中优惠规则"
        );

        ProcessOutcome::Awarded(self.sink.record(&bet, &selection).await)
    }
}

fn decode_bet(msg: &ConsumerMessage) -> Result<BetEvent, String> {
    let bet: BetEvent = msg.deserialize_payload().map_err(|e| e.to_string())?;
    bet.validate().map_err(|e| e.to_string())?;
    Ok(bet)
}
