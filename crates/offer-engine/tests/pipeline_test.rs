//! 端到端处理管道测试
//!
//! 用内存消息源、内存奖励存储和记录型发布者驱动规则更新消费者与投注消费循环，
//! 覆盖规则变更、匹配择优、幂等落库、重复发布与位点提交。

use std::sync::Arc;

use offer_engine::award_sink::AwardSink;
use offer_engine::consumer::{BetConsumer, LoopStats};
use offer_engine::models::{Rule, RuleEvent};
use offer_engine::processor::BetProcessor;
use offer_engine::rule_ingestor::RuleUpdateIngestor;
use offer_engine::startup;
use offer_engine::test_utils::{
    CommitLog, InMemoryAwardStore, InMemoryRuleStore, InMemorySource, RecordingPublisher,
    SourceStep, bet_message, raw_message, rule_upsert_message,
};
use offer_shared::kafka::ConsumerMessage;
use offer_shared::retry::FixedBackoff;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, watch};

struct Engine {
    processor: BetProcessor,
    rule_tx: mpsc::Sender<RuleEvent>,
    store: Arc<InMemoryAwardStore>,
    publisher: Arc<RecordingPublisher>,
}

async fn engine(rules: Vec<Rule>, publish_on_conflict: bool) -> Engine {
    let cache = startup::load_rule_cache(&InMemoryRuleStore::new(rules))
        .await
        .unwrap();
    let store = Arc::new(InMemoryAwardStore::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let sink = AwardSink::new(store.clone(), publisher.clone(), publish_on_conflict);
    let (rule_tx, rule_rx) = mpsc::channel(16);

    Engine {
        processor: BetProcessor::new(cache, rule_rx, sink),
        rule_tx,
        store,
        publisher,
    }
}

/// 跑完规则消息脚本，全部更新进入交接队列
async fn ingest_rules(tx: mpsc::Sender<RuleEvent>, messages: Vec<ConsumerMessage>) -> CommitLog {
    let (stop_tx, stop_rx) = watch::channel(false);
    let source = InMemorySource::new(messages.into_iter().map(SourceStep::Message).collect())
        .stop_when_drained(stop_tx);
    let commits = source.commits();

    RuleUpdateIngestor::new(source, tx, FixedBackoff::default())
        .run(stop_rx)
        .await;
    commits
}

/// 跑完投注消息脚本
async fn consume_bets(processor: BetProcessor, messages: Vec<ConsumerMessage>) -> (LoopStats, CommitLog) {
    let (stop_tx, stop_rx) = watch::channel(false);
    let source = InMemorySource::new(messages.into_iter().map(SourceStep::Message).collect())
        .stop_when_drained(stop_tx);
    let commits = source.commits();

    let stats = BetConsumer::new(source, processor, FixedBackoff::default())
        .run(stop_rx)
        .await;
    (stats, commits)
}

#[tokio::test]
async fn test_single_rule_award() {
    let e = engine(vec![Rule::new(1, dec!(10), dec!(0.10), true)], true).await;

    let (stats, _) = consume_bets(e.processor, vec![bet_message(0, "evt-1", "u-1", 50.0)]).await;

    assert_eq!(stats.awarded, 1);
    let award = e.store.get("evt-1").unwrap();
    assert_eq!(award.offer_id, 1);
    assert_eq!(award.bonus_amount, dec!(5.00));
    assert_eq!(award.user_id, "u-1");

    let published = e.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].award_id, award.award_id);
    assert_eq!(published[0].bonus_amount, dec!(5.00));
}

#[tokio::test]
async fn test_tie_goes_to_first_inserted_rule() {
    let e = engine(
        vec![
            Rule::new(1, dec!(10), dec!(0.05), true),
            Rule::new(2, dec!(20), dec!(0.05), true),
        ],
        true,
    )
    .await;

    consume_bets(e.processor, vec![bet_message(0, "evt-1", "u-1", 25.0)]).await;

    let award = e.store.get("evt-1").unwrap();
    assert_eq!(award.offer_id, 1);
    assert_eq!(award.bonus_amount, dec!(1.25));
}

#[tokio::test]
async fn test_stake_below_minimum_gets_nothing() {
    let e = engine(vec![Rule::new(1, dec!(10), dec!(0.10), true)], true).await;

    let (stats, commits) = consume_bets(e.processor, vec![bet_message(0, "evt-1", "u-1", 5.0)]).await;

    assert_eq!(stats.unmatched, 1);
    assert!(e.store.is_empty());
    assert!(e.publisher.published().is_empty());
    assert_eq!(commits.lock().clone(), vec![(0, 0)]);
}

#[tokio::test]
async fn test_malformed_bet_advances_offset_without_award() {
    let e = engine(vec![Rule::new(1, dec!(0), dec!(0.10), true)], true).await;

    let (stats, commits) = consume_bets(
        e.processor,
        vec![
            raw_message("events.bet_qualified", 0, "{\"eventId\":"),
            bet_message(1, "evt-2", "u-1", 20.0),
        ],
    )
    .await;

    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.awarded, 1);
    assert_eq!(commits.lock().clone(), vec![(0, 0), (0, 1)]);
    assert!(e.store.get("evt-2").is_some());
    assert_eq!(e.store.len(), 1);
}

#[tokio::test]
async fn test_redelivered_bet_is_stored_once_but_published_twice() {
    let e = engine(vec![Rule::new(1, dec!(0), dec!(0.10), true)], true).await;

    consume_bets(
        e.processor,
        vec![
            bet_message(0, "evt-1", "u-1", 40.0),
            bet_message(0, "evt-1", "u-1", 40.0),
        ],
    )
    .await;

    assert_eq!(e.store.len(), 1);
    let stored = e.store.get("evt-1").unwrap();

    let published = e.publisher.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].award_id, stored.award_id);
    // 重复发布携带新生成的 awardId，与持久化记录不一致
    assert_ne!(published[1].award_id, stored.award_id);
    assert!(published.iter().all(|a| a.event_id == "evt-1"));
}

#[tokio::test]
async fn test_redelivered_bet_is_not_republished_when_disabled() {
    let e = engine(vec![Rule::new(1, dec!(0), dec!(0.10), true)], false).await;

    consume_bets(
        e.processor,
        vec![
            bet_message(0, "evt-1", "u-1", 40.0),
            bet_message(0, "evt-1", "u-1", 40.0),
        ],
    )
    .await;

    assert_eq!(e.store.len(), 1);
    assert_eq!(e.publisher.published().len(), 1);
}

#[tokio::test]
async fn test_store_outage_drops_award_and_continues() {
    let e = engine(vec![Rule::new(1, dec!(0), dec!(0.10), true)], true).await;
    e.store.set_failing(true);

    let (stats, commits) = consume_bets(e.processor, vec![bet_message(0, "evt-1", "u-1", 40.0)]).await;

    assert_eq!(stats.consumed, 1);
    assert_eq!(stats.awarded, 0);
    assert!(e.publisher.published().is_empty());
    assert_eq!(commits.lock().clone(), vec![(0, 0)]);
}

#[tokio::test]
async fn test_publish_failure_keeps_award_and_commits() {
    let e = engine(vec![Rule::new(1, dec!(10), dec!(0.10), true)], true).await;
    e.publisher.set_failing(true);

    let (stats, commits) = consume_bets(
        e.processor,
        vec![
            bet_message(0, "evt-1", "u-1", 50.0),
            bet_message(1, "evt-2", "u-2", 20.0),
        ],
    )
    .await;

    // 发布失败不回滚落库，也不阻塞位点
    assert_eq!(stats.awarded, 2);
    assert_eq!(e.store.len(), 2);
    assert_eq!(e.store.get("evt-2").unwrap().bonus_amount, dec!(2.00));
    assert!(e.publisher.published().is_empty());
    assert_eq!(commits.lock().clone(), vec![(0, 0), (0, 1)]);
}

#[tokio::test]
async fn test_rule_stream_updates_apply_before_next_bet() {
    let e = engine(
        vec![
            Rule::new(1, dec!(0), dec!(0.10), true),
            Rule::new(2, dec!(0), dec!(0.05), true),
        ],
        true,
    )
    .await;

    let rule_commits = ingest_rules(
        e.rule_tx.clone(),
        vec![
            // 停用规则 1
            rule_upsert_message(0, 1, 0.0, 0.10, false),
            raw_message("offers.rules", 1, "not a rule"),
            // 新规则 3，门槛 100
            rule_upsert_message(2, 3, 100.0, 0.20, true),
        ],
    )
    .await;
    assert_eq!(rule_commits.lock().clone(), vec![(0, 0), (0, 1), (0, 2)]);

    let (stats, _) = consume_bets(
        e.processor,
        vec![
            bet_message(0, "small", "u-1", 50.0),
            bet_message(1, "large", "u-1", 200.0),
        ],
    )
    .await;

    assert_eq!(stats.awarded, 2);
    // 规则 1 已停用，只剩规则 2 可选：50 × 0.05
    let small = e.store.get("small").unwrap();
    assert_eq!(small.offer_id, 2);
    assert_eq!(small.bonus_amount, dec!(2.50));
    // 规则 3 生效：200 × 0.20
    let large = e.store.get("large").unwrap();
    assert_eq!(large.offer_id, 3);
    assert_eq!(large.bonus_amount, dec!(40.00));
}

#[tokio::test]
async fn test_zero_bonus_rule_never_awards() {
    let e = engine(vec![Rule::new(1, dec!(0), dec!(0), true)], true).await;

    let (stats, _) = consume_bets(e.processor, vec![bet_message(0, "evt-1", "u-1", 1000.0)]).await;

    assert_eq!(stats.unmatched, 1);
    assert!(e.store.is_empty());
}

#[tokio::test]
async fn test_published_event_wire_format() {
    let e = engine(vec![Rule::new(7, dec!(10), dec!(0.10), true)], true).await;

    consume_bets(e.processor, vec![bet_message(0, "evt-9", "u-9", 50.0)]).await;

    let published = e.publisher.published();
    let value = serde_json::to_value(&published[0]).unwrap();
    assert_eq!(value["eventId"], "evt-9");
    assert_eq!(value["userId"], "u-9");
    assert_eq!(value["offerId"], 7);
    assert_eq!(value["stake"], 50.0);
    assert_eq!(value["bonusAmount"], 5.0);
    assert!(value["awardId"].is_string());
    assert!(value["ts"].as_i64().unwrap() > 0);
}
