//! 投注奖励引擎
//!
//! 消费合格投注事件，按内存中的优惠规则为每笔投注挑选至多一条奖励，
//! 以投注 eventId 为幂等键持久化奖励记录，再把奖励事件发布给下游。
//!
//! 运行期有两条独立的消费路径：
//! - 规则更新消费者（`rule_ingestor`）：解码规则变更，通过有界队列交给处理循环
//! - 投注消费循环（`consumer`）：每条投注处理前吸收已缓冲的规则更新，处理后提交位点
//!
//! 规则缓存只由投注处理循环读写，规则更新与匹配之间不需要加锁。

pub mod award_sink;
pub mod consumer;
pub mod error;
pub mod matcher;
pub mod models;
pub mod processor;
pub mod repository;
pub mod rule_cache;
pub mod rule_ingestor;
pub mod startup;
pub mod test_utils;
