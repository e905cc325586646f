//! 测试工具模块
//!
//! 提供不依赖 Kafka / PostgreSQL 的内存实现，用于单元测试和集成测试：
//! - `InMemorySource`：按脚本依次返回消息或读取错误，并记录提交的位点
//! - `InMemoryAwardStore`：以 event_id 为唯一键的奖励存储
//! - `InMemoryRuleStore`：固定规则快照
//! - `RecordingPublisher`：记录发布出去的奖励事件

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use offer_shared::error::{OfferError, Result};
use offer_shared::kafka::{ConsumerMessage, MessageSource};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;

use crate::award_sink::AwardPublisher;
use crate::models::{AwardEvent, NewAward, Rule};
use crate::repository::{AwardStore, RuleStore};

/// 已提交位点列表：(partition, offset)
pub type CommitLog = Arc<Mutex<Vec<(i32, i64)>>>;

// ==================== 消息源 ====================

/// 内存消息源的一步
#[derive(Debug, Clone)]
pub enum SourceStep {
    Message(ConsumerMessage),
    ReadError(String),
}

/// 按脚本回放的消息源
///
/// 脚本耗尽后 `fetch` 永远挂起；若设置了关闭信号，耗尽时先发出关闭信号，
/// 让读循环自然退出。
pub struct InMemorySource {
    steps: VecDeque<SourceStep>,
    commits: CommitLog,
    stop_when_drained: Option<watch::Sender<bool>>,
}

impl InMemorySource {
    pub fn new(steps: Vec<SourceStep>) -> Self {
        Self {
            steps: steps.into(),
            commits: Arc::new(Mutex::new(Vec::new())),
            stop_when_drained: None,
        }
    }

    /// 脚本耗尽时发出关闭信号
    pub fn stop_when_drained(mut self, stop: watch::Sender<bool>) -> Self {
        self.stop_when_drained = Some(stop);
        self
    }

    /// 已提交位点的共享句柄
    pub fn commits(&self) -> CommitLog {
        self.commits.clone()
    }
}

#[async_trait]
impl MessageSource for InMemorySource {
    async fn fetch(&mut self) -> Result<ConsumerMessage> {
        match self.steps.pop_front() {
            Some(SourceStep::Message(msg)) => Ok(msg),
            Some(SourceStep::ReadError(reason)) => Err(OfferError::Kafka(reason)),
            None => {
                if let Some(stop) = self.stop_when_drained.take() {
                    let _ = stop.send(true);
                }
                std::future::pending().await
            }
        }
    }

    async fn commit(&mut self, msg: &ConsumerMessage) -> Result<()> {
        self.commits.lock().push((msg.partition, msg.offset));
        Ok(())
    }
}

// ==================== 存储 ====================

/// 固定快照的规则存储
#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: Vec<Rule>,
    fail: bool,
}

impl InMemoryRuleStore {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules, fail: false }
    }

    /// 模拟存储不可用
    pub fn failing() -> Self {
        Self {
            rules: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn load_active_rules(&self) -> Result<Vec<Rule>> {
        if self.fail {
            return Err(OfferError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut rules: Vec<Rule> = self.rules.iter().filter(|r| r.active).cloned().collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }
}

/// 以 event_id 为唯一键的奖励存储
#[derive(Default)]
pub struct InMemoryAwardStore {
    awards: Mutex<HashMap<String, NewAward>>,
    fail: AtomicBool,
}

impl InMemoryAwardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 切换为写入失败模式
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, event_id: &str) -> Option<NewAward> {
        self.awards.lock().get(event_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.awards.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.awards.lock().is_empty()
    }
}

#[async_trait]
impl AwardStore for InMemoryAwardStore {
    async fn insert_award_if_absent(&self, award: &NewAward) -> Result<bool> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OfferError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut awards = self.awards.lock();
        if awards.contains_key(&award.event_id) {
            return Ok(false);
        }
        awards.insert(award.event_id.clone(), award.clone());
        Ok(true)
    }
}

// ==================== 发布者 ====================

/// 记录所有发布事件的发布者
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<AwardEvent>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<AwardEvent> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl AwardPublisher for RecordingPublisher {
    async fn publish(&self, award: &AwardEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OfferError::Kafka("模拟发布失败".to_string()));
        }
        self.published.lock().push(award.clone());
        Ok(())
    }
}

// ==================== 消息构造 ====================

/// 构造投注消息，stake 以 JSON 数字编码
pub fn bet_message(offset: i64, event_id: &str, user_id: &str, stake: f64) -> ConsumerMessage {
    let payload = json!({
        "eventId": event_id,
        "ts": 1_700_000_000_000_i64,
        "userId": user_id,
        "market": "EPL",
        "stake": stake,
        "currency": "GBP",
    });
    ConsumerMessage::new("events.bet_qualified", 0, offset, payload.to_string().into_bytes())
}

/// 构造 UPSERT 规则更新消息
pub fn rule_upsert_message(
    offset: i64,
    id: i64,
    min_stake: f64,
    bonus_pct: f64,
    active: bool,
) -> ConsumerMessage {
    let payload = json!({
        "type": "UPSERT",
        "rule": {
            "id": id,
            "minStake": min_stake,
            "bonusPct": bonus_pct,
            "active": active,
        },
    });
    ConsumerMessage::new("offers.rules", 0, offset, payload.to_string().into_bytes())
}

/// 构造任意原始负载的消息
pub fn raw_message(topic: &str, offset: i64, payload: &str) -> ConsumerMessage {
    ConsumerMessage::new(topic, 0, offset, payload.as_bytes().to_vec())
}
