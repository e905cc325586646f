//! 优惠库连接
//!
//! 引擎只用到两张表：启动时读取一次的 `offers`，以及按 `event_id`
//! 幂等写入的 `awards`。幂等依赖 `awards_event_id_key` 唯一约束，
//! 该约束由 migrations/ 下的建表脚本创建。

use crate::config::DatabaseConfig;
use crate::error::{OfferError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

/// 优惠库连接池
///
/// 规则加载与奖励写入共用同一个池；投注循环是串行的，池的大小主要留给启动和健康检查。
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 按配置建立连接池，连不上即返回错误，由调用方决定退出
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!("已连接优惠库");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 启动前确认库可用
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(OfferError::from)
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("优惠库连接池已关闭");
    }

    /// 创建 `offers` / `awards` 表及 `event_id` 唯一约束
    ///
    /// 脚本编译期嵌入，仅在 `database.run_migrations = true` 时由入口调用；
    /// 默认假定表结构由外部维护。
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("优惠库表结构已就绪");
        Ok(())
    }
}
