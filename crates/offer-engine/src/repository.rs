//! 规则存储与奖励存储
//!
//! 定义仓储接口，引擎只依赖抽象，便于 mock 测试；`PgOfferRepository` 是 PostgreSQL 实现。

use async_trait::async_trait;
use offer_shared::error::Result;
use sqlx::PgPool;
use tracing::instrument;

use crate::models::{NewAward, Rule};

/// 规则存储接口（启动时的规则真相来源）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// 加载所有 active 规则，按 id 升序
    async fn load_active_rules(&self) -> Result<Vec<Rule>>;
}

/// 奖励存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AwardStore: Send + Sync {
    /// 以 event_id 为幂等键写入奖励
    ///
    /// 冲突（该投注已有奖励）不是错误：返回 `Ok(false)`；新写入返回 `Ok(true)`。
    /// 只有存储本身失败才返回错误。
    async fn insert_award_if_absent(&self, award: &NewAward) -> Result<bool>;
}

/// PostgreSQL 仓储
pub struct PgOfferRepository {
    pool: PgPool,
}

impl PgOfferRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleStore for PgOfferRepository {
    #[instrument(skip(self))]
    async fn load_active_rules(&self) -> Result<Vec<Rule>> {
        let rules = sqlx::query_as::<_, Rule>(
            r#"
            SELECT id::BIGINT AS id, min_stake, bonus_pct, active
            FROM offers
            WHERE active = TRUE
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rules)
    }
}

#[async_trait]
impl AwardStore for PgOfferRepository {
    #[instrument(skip(self, award), fields(event_id = %award.event_id))]
    async fn insert_award_if_absent(&self, award: &NewAward) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO awards (id, event_id, user_id, stake, bonus_amount, offer_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(award.award_id)
        .bind(&award.event_id)
        .bind(&award.user_id)
        .bind(award.stake)
        .bind(award.bonus_amount)
        .bind(award.offer_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
