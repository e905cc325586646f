//! 规则匹配与择优
//!
//! 纯函数：给定一笔投注和当前规则快照，选出至多一条获胜规则及其奖励金额。
//!
//! 选择规则：
//! - 候选规则：`active = true` 且 `stake >= minStake`
//! - 候选金额：`round(stake × bonusPct, 2)`，中点远离零舍入
//! - 取金额严格最大的候选；金额相同时保留快照中先出现的那条（即缓存插入顺序，
//!   与规则 id 大小无关）
//! - 最佳金额为 0 时不产生奖励

use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::Rule;

/// 奖励金额保留的小数位
pub const BONUS_DECIMAL_PLACES: u32 = 2;

/// 匹配结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub rule_id: i64,
    pub bonus_amount: Decimal,
}

/// 规则是否为该投注额的候选
pub fn is_candidate(rule: &Rule, stake: Decimal) -> bool {
    rule.active && stake >= rule.min_stake
}

/// 计算奖励金额，溢出时返回 None
pub fn compute_bonus(stake: Decimal, bonus_pct: Decimal) -> Option<Decimal> {
    stake.checked_mul(bonus_pct).map(|raw| {
        raw.round_dp_with_strategy(BONUS_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
    })
}

/// 在规则快照中为投注额选择获胜规则
pub fn select_best(stake: Decimal, rules: &[Rule]) -> Option<Selection> {
    let mut best: Option<Selection> = None;
    let mut best_amount = Decimal::ZERO;

    for rule in rules.iter().filter(|r| is_candidate(r, stake)) {
        let Some(amount) = compute_bonus(stake, rule.bonus_pct) else {
            tracing::warn!(rule_id = rule.id, %stake, "奖励金额计算溢出，跳过该规则");
            continue;
        };

        // 严格大于：平局保留先出现的候选，零金额永远不会被选中
        if amount > best_amount {
            best_amount = amount;
            best = Some(Selection {
                rule_id: rule.id,
                bonus_amount: amount,
            });
        }
    }

    best
}
