//! 引擎数据模型
//!
//! 三类消息的线上格式都是 camelCase JSON：
//! - 投注事件（消费）：`{eventId, ts, userId, market, stake, currency}`
//! - 规则更新事件（消费）：`{type, rule: {id, minStake, bonusPct, active}}`
//! - 奖励事件（生产）：`{awardId, eventId, userId, offerId, stake, bonusAmount, ts}`
//!
//! 金额统一使用 `Decimal`，保证两位小数舍入精确；奖励事件中的金额序列化为 JSON 数字。

use offer_shared::error::{OfferError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// 优惠规则
///
/// 由管理端创建，运行期只会被规则更新事件按 `id` 整体替换；没有删除，
/// 停用通过 `active = false` 表达。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: i64,
    /// 最低投注额（含）
    pub min_stake: Decimal,
    /// 奖励比例，按投注额的小数比例计算（0.10 表示 10%）
    pub bonus_pct: Decimal,
    pub active: bool,
}

impl Rule {
    pub fn new(id: i64, min_stake: Decimal, bonus_pct: Decimal, active: bool) -> Self {
        Self {
            id,
            min_stake,
            bonus_pct,
            active,
        }
    }

    /// 金额字段不允许为负
    pub fn validate(&self) -> Result<()> {
        if self.min_stake.is_sign_negative() {
            return Err(OfferError::Validation(format!(
                "规则 {} 的 minStake 为负: {}",
                self.id, self.min_stake
            )));
        }
        if self.bonus_pct.is_sign_negative() {
            return Err(OfferError::Validation(format!(
                "规则 {} 的 bonusPct 为负: {}",
                self.id, self.bonus_pct
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RuleEvent
// ---------------------------------------------------------------------------

/// 规则更新事件类型
///
/// 只有 `UPSERT` 有定义的缓存语义；其他取值照常解码，原样保留以便记录日志，
/// 由缓存侧忽略。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleEventType {
    Upsert,
    Other(String),
}

impl From<String> for RuleEventType {
    fn from(value: String) -> Self {
        if value == "UPSERT" {
            Self::Upsert
        } else {
            Self::Other(value)
        }
    }
}

impl From<RuleEventType> for String {
    fn from(value: RuleEventType) -> Self {
        match value {
            RuleEventType::Upsert => "UPSERT".to_string(),
            RuleEventType::Other(other) => other,
        }
    }
}

impl std::fmt::Display for RuleEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upsert => write!(f, "UPSERT"),
            Self::Other(other) => write!(f, "{other}"),
        }
    }
}

/// 规则更新事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEvent {
    #[serde(rename = "type")]
    pub event_type: RuleEventType,
    pub rule: Rule,
}

impl RuleEvent {
    pub fn upsert(rule: Rule) -> Self {
        Self {
            event_type: RuleEventType::Upsert,
            rule,
        }
    }
}

// ---------------------------------------------------------------------------
// BetEvent
// ---------------------------------------------------------------------------

/// 投注事件
///
/// `eventId` 是奖励去重的幂等键，必须存在；其余描述性字段缺失时取默认值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetEvent {
    pub event_id: String,
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub market: String,
    pub stake: Decimal,
    #[serde(default)]
    pub currency: String,
}

impl BetEvent {
    /// 解码后的业务校验：幂等键非空、投注额为正
    pub fn validate(&self) -> Result<()> {
        if self.event_id.trim().is_empty() {
            return Err(OfferError::Validation("eventId 不能为空".to_string()));
        }
        if self.stake <= Decimal::ZERO {
            return Err(OfferError::Validation(format!(
                "投注额必须为正: event_id={}, stake={}",
                self.event_id, self.stake
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Award
// ---------------------------------------------------------------------------

/// 待写入的奖励记录
///
/// `event_id` 上的唯一约束保证每笔投注至多一条持久化奖励。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAward {
    pub award_id: Uuid,
    pub event_id: String,
    pub user_id: String,
    pub offer_id: i64,
    pub stake: Decimal,
    pub bonus_amount: Decimal,
}

/// 奖励事件，发布到奖励流供下游（实时看板）消费
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardEvent {
    pub award_id: Uuid,
    pub event_id: String,
    pub user_id: String,
    pub offer_id: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub stake: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub bonus_amount: Decimal,
    /// 事件生成时间（Unix 毫秒）
    pub ts: i64,
}

impl AwardEvent {
    pub fn from_award(award: &NewAward, ts: i64) -> Self {
        Self {
            award_id: award.award_id,
            event_id: award.event_id.clone(),
            user_id: award.user_id.clone(),
            offer_id: award.offer_id,
            stake: award.stake,
            bonus_amount: award.bonus_amount,
            ts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_bet_event_deserialize_from_numbers() {
        let json = r#"{"eventId":"evt-1","ts":1700000000000,"userId":"u-42","market":"EPL","stake":50.25,"currency":"GBP"}"#;
        let bet: BetEvent = serde_json::from_str(json).unwrap();

        assert_eq!(bet.event_id, "evt-1");
        assert_eq!(bet.ts, 1_700_000_000_000);
        assert_eq!(bet.user_id, "u-42");
        assert_eq!(bet.market, "EPL");
        assert_eq!(bet.stake, dec!(50.25));
        assert_eq!(bet.currency, "GBP");
        assert!(bet.validate().is_ok());
    }

    #[test]
    fn test_bet_event_requires_event_id_and_stake() {
        assert!(serde_json::from_str::<BetEvent>(r#"{"stake":10}"#).is_err());
        assert!(serde_json::from_str::<BetEvent>(r#"{"eventId":"evt-1"}"#).is_err());
    }

    #[test]
    fn test_bet_event_rejects_non_positive_stake() {
        let bet: BetEvent = serde_json::from_str(r#"{"eventId":"evt-1","stake":0}"#).unwrap();
        assert!(bet.validate().is_err());

        let bet: BetEvent = serde_json::from_str(r#"{"eventId":"evt-1","stake":-5}"#).unwrap();
        assert!(bet.validate().is_err());
    }

    #[test]
    fn test_bet_event_rejects_blank_event_id() {
        let bet: BetEvent = serde_json::from_str(r#"{"eventId":"  ","stake":5}"#).unwrap();
        assert_eq!(bet.validate().unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_rule_event_upsert_deserialize() {
        let json = r#"{"type":"UPSERT","rule":{"id":7,"minStake":10,"bonusPct":0.1,"active":true}}"#;
        let event: RuleEvent = serde_json::from_str(json).unwrap();

        assert_eq!(event.event_type, RuleEventType::Upsert);
        assert_eq!(event.rule, Rule::new(7, dec!(10), dec!(0.1), true));
    }

    #[test]
    fn test_rule_event_unknown_type_is_preserved() {
        let json = r#"{"type":"DELETE","rule":{"id":7,"minStake":10,"bonusPct":0.1,"active":true}}"#;
        let event: RuleEvent = serde_json::from_str(json).unwrap();

        assert_eq!(event.event_type, RuleEventType::Other("DELETE".to_string()));
        assert_eq!(event.event_type.to_string(), "DELETE");
    }

    #[test]
    fn test_rule_event_serializes_type_field() {
        let event = RuleEvent::upsert(Rule::new(1, dec!(5), dec!(0.05), false));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "UPSERT");
        assert_eq!(value["rule"]["id"], 1);
        assert_eq!(value["rule"]["active"], false);
    }

    #[test]
    fn test_rule_validate_rejects_negative_amounts() {
        assert!(Rule::new(1, dec!(-1), dec!(0.1), true).validate().is_err());
        assert!(Rule::new(1, dec!(1), dec!(-0.1), true).validate().is_err());
        assert!(Rule::new(1, dec!(0), dec!(0), true).validate().is_ok());
    }

    #[test]
    fn test_award_event_wire_format() {
        let award = NewAward {
            award_id: Uuid::nil(),
            event_id: "evt-9".to_string(),
            user_id: "u-1".to_string(),
            offer_id: 3,
            stake: dec!(50),
            bonus_amount: dec!(5.00),
        };
        let event = AwardEvent::from_award(&award, 1_700_000_000_123);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["awardId"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(value["eventId"], "evt-9");
        assert_eq!(value["userId"], "u-1");
        assert_eq!(value["offerId"], 3);
        assert_eq!(value["stake"].as_f64(), Some(50.0));
        assert_eq!(value["bonusAmount"].as_f64(), Some(5.0));
        assert_eq!(value["ts"], 1_700_000_000_123_i64);
    }
}
