//! 奖励落库与发布
//!
//! 先以 event_id 为幂等键持久化奖励记录，再向奖励流发布奖励事件。
//!
//! 已知缺口：存储层的"冲突忽略"与"新写入"在默认配置下不做区分，
//! 同一投注被重复投递（例如崩溃后位点未提交）时，持久化记录仍只有一条，
//! 但奖励事件会被再次发布，且携带本次新生成的 awardId。
//! `publish_on_conflict = false` 时改为冲突即跳过发布。
//!
//! 写库失败与发布失败都只记录日志、不重试：投注位点照常提交，该奖励就此丢弃。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use offer_shared::error::Result;
use offer_shared::kafka::KafkaProducer;
use offer_shared::observability::metrics as engine_metrics;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::matcher::Selection;
use crate::models::{AwardEvent, BetEvent, NewAward};
use crate::repository::AwardStore;

/// 奖励事件发布接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AwardPublisher: Send + Sync {
    async fn publish(&self, award: &AwardEvent) -> Result<()>;
}

/// 基于 Kafka 的奖励发布者，以 eventId 作为消息 key
pub struct KafkaAwardPublisher {
    producer: KafkaProducer,
    topic: String,
}

impl KafkaAwardPublisher {
    pub fn new(producer: KafkaProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl AwardPublisher for KafkaAwardPublisher {
    async fn publish(&self, award: &AwardEvent) -> Result<()> {
        self.producer
            .send_json(&self.topic, &award.event_id, award)
            .await
            .map(|_| ())
    }
}

/// 单次奖励处理的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardOutcome {
    /// 已落库（或冲突忽略）并发布；`inserted = false` 表示这是一次重复发布
    Published { award_id: Uuid, inserted: bool },
    /// 该投注已有奖励记录，按配置跳过发布
    SkippedDuplicate,
    /// 写库失败，奖励被丢弃
    StoreFailed,
    /// 已落库但发布失败
    PublishFailed { award_id: Uuid, inserted: bool },
}

impl AwardOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Published { .. } => "published",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::StoreFailed => "store_failed",
            Self::PublishFailed { .. } => "publish_failed",
        }
    }
}

/// 奖励落库与发布
///
/// 使用 trait object 而非泛型参数，存储与发布的具体实现在启动时注入，
/// 测试时替换为内存实现。
pub struct AwardSink {
    store: Arc<dyn AwardStore>,
    publisher: Arc<dyn AwardPublisher>,
    publish_on_conflict: bool,
}

impl AwardSink {
    pub fn new(
        store: Arc<dyn AwardStore>,
        publisher: Arc<dyn AwardPublisher>,
        publish_on_conflict: bool,
    ) -> Self {
        Self {
            store,
            publisher,
            publish_on_conflict,
        }
    }

    /// 为匹配成功的投注写入并发布奖励
    pub async fn record(&self, bet: &BetEvent, selection: &Selection) -> AwardOutcome {
        let award = NewAward {
            award_id: Uuid::now_v7(),
            event_id: bet.event_id.clone(),
            user_id: bet.user_id.clone(),
            offer_id: selection.rule_id,
            stake: bet.stake,
            bonus_amount: selection.bonus_amount,
        };

        let outcome = self.persist_and_publish(&award).await;
        engine_metrics::record_award(outcome.as_str());
        outcome
    }

    async fn persist_and_publish(&self, award: &NewAward) -> AwardOutcome {
        let inserted = match self.store.insert_award_if_absent(award).await {
            Ok(inserted) => inserted,
            Err(e) => {
                error!(
                    event_id = %award.event_id,
                    offer_id = award.offer_id,
                    error = %e,
                    "奖励写库失败，奖励被丢弃"
                );
                return AwardOutcome::StoreFailed;
            }
        };

        if !inserted {
            if !self.publish_on_conflict {
                info!(event_id = %award.event_id, "该投注已有奖励记录，跳过发布");
                return AwardOutcome::SkippedDuplicate;
            }
            warn!(
                event_id = %award.event_id,
                "该投注已有奖励记录，仍重复发布奖励事件"
            );
        }

        let event = AwardEvent::from_award(award, Utc::now().timestamp_millis());
        if let Err(e) = self.publisher.publish(&event).await {
            error!(
                event_id = %award.event_id,
                award_id = %award.award_id,
                error = %e,
                "奖励事件发布失败"
            );
            return AwardOutcome::PublishFailed {
                award_id: award.award_id,
                inserted,
            };
        }

        info!(
            event_id = %award.event_id,
            award_id = %award.award_id,
            user_id = %award.user_id,
            offer_id = award.offer_id,
            bonus_amount = %award.bonus_amount,
            inserted,
            "奖励已发布"
        );

        AwardOutcome::Published {
            award_id: award.award_id,
            inserted,
        }
    }
}
