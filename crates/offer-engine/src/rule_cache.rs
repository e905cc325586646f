//! 规则缓存
//!
//! 内存中的规则表：规则 id -> 规则属性，保持插入顺序。
//!
//! ## 所有权
//!
//! 缓存由处理循环独占持有，规则更新通过有界队列交给处理循环后再写入，
//! 读（匹配）与写（更新）天然串行，不需要锁。
//!
//! ## 顺序
//!
//! 启动时从规则存储加载的规则按 id 升序排列；之后新出现的 id 追加到末尾，
//! 已存在的 id 原地替换、位置不变。匹配平局时按这一顺序取先出现者。

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::models::{Rule, RuleEvent, RuleEventType};

/// upsert 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
        }
    }
}

/// 规则缓存
#[derive(Debug, Default)]
pub struct RuleCache {
    rules: Vec<Rule>,
    /// 规则 id -> 在 `rules` 中的下标
    positions: HashMap<i64, usize>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用规则存储的快照初始化缓存
    ///
    /// 只保留 active 规则并按 id 升序排列；停用的规则要等后续更新事件重新激活才会进入缓存。
    /// 快照中重复的 id 以后出现者为准。
    pub fn from_active_rules(rules: Vec<Rule>) -> Self {
        let mut active: Vec<Rule> = rules.into_iter().filter(|r| r.active).collect();
        active.sort_by_key(|r| r.id);

        let mut cache = Self::new();
        for rule in active {
            cache.upsert(rule);
        }
        cache
    }

    /// 当前规则快照（按缓存顺序）
    pub fn snapshot(&self) -> &[Rule] {
        &self.rules
    }

    /// 按 id 插入或整体替换规则
    pub fn upsert(&mut self, rule: Rule) -> UpsertOutcome {
        match self.positions.get(&rule.id) {
            Some(&idx) => {
                self.rules[idx] = rule;
                UpsertOutcome::Updated
            }
            None => {
                self.positions.insert(rule.id, self.rules.len());
                self.rules.push(rule);
                UpsertOutcome::Inserted
            }
        }
    }

    /// 应用一条规则更新事件
    ///
    /// 非 UPSERT 类型没有定义的语义，记录告警后忽略，返回 None。
    pub fn apply(&mut self, event: RuleEvent) -> Option<UpsertOutcome> {
        match event.event_type {
            RuleEventType::Upsert => {
                let rule_id = event.rule.id;
                let active = event.rule.active;
                let outcome = self.upsert(event.rule);
                debug!(rule_id, active, outcome = outcome.as_str(), "规则缓存已更新");
                Some(outcome)
            }
            RuleEventType::Other(kind) => {
                warn!(rule_id = event.rule.id, event_type = %kind, "未知的规则事件类型，忽略");
                None
            }
        }
    }

    pub fn get(&self, id: i64) -> Option<&Rule> {
        self.positions.get(&id).map(|&idx| &self.rules[idx])
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
