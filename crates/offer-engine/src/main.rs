//! 投注奖励引擎入口
//!
//! 启动顺序：配置 -> 可观测性 -> 数据库 -> 初始规则缓存 -> Kafka -> 两条消费路径。
//! 任一启动步骤失败都直接退出进程。

use std::sync::Arc;

use anyhow::Result;
use offer_shared::{
    config::AppConfig,
    database::Database,
    kafka::{self, KafkaConsumer, KafkaProducer},
    observability,
    retry::FixedBackoff,
    shutdown,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use offer_engine::{
    award_sink::{AwardSink, KafkaAwardPublisher},
    consumer::BetConsumer,
    processor::BetProcessor,
    repository::PgOfferRepository,
    rule_ingestor::RuleUpdateIngestor,
    startup,
};

const SERVICE_NAME: &str = "offer-engine";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置，失败时回退到默认值（tracing 尚未初始化，先记下错误）
    let (config, load_error) = match AppConfig::load(SERVICE_NAME) {
        Ok(config) => (config, None),
        Err(e) => {
            let mut config = AppConfig::default();
            config.service_name = SERVICE_NAME.to_string();
            config.apply_legacy_env(|key| std::env::var(key).ok());
            (config, Some(e))
        }
    };

    // 2. 初始化日志与指标
    let _guard = observability::init(&config.service_name, &config.observability).await?;
    if let Some(e) = load_error {
        warn!(error = %e, "加载配置失败，使用默认配置");
    }
    startup::check_config(&config)?;

    info!(
        environment = %config.environment,
        brokers = %config.kafka.brokers,
        bet_topic = %config.topics.bets,
        rule_topic = %config.topics.rules,
        award_topic = %config.topics.awards,
        "Starting offer-engine..."
    );

    // 3. 数据库
    let db = Database::connect(&config.database).await?;
    db.health_check().await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }
    let repo = Arc::new(PgOfferRepository::new(db.pool().clone()));

    // 4. 初始规则缓存，失败即退出
    let cache = startup::load_rule_cache(repo.as_ref()).await?;

    // 5. Kafka
    if config.kafka.ensure_topics {
        let topics = [
            config.topics.bets.as_str(),
            config.topics.rules.as_str(),
            config.topics.awards.as_str(),
        ];
        if let Err(e) = kafka::ensure_topics(&config.kafka, &topics).await {
            warn!(error = %e, "创建 Kafka topic 失败，依赖 broker 自动创建");
        }
    }

    let producer = KafkaProducer::new(&config.kafka)?;
    let publisher = Arc::new(KafkaAwardPublisher::new(producer, config.topics.awards.clone()));
    if config.is_production() && config.engine.publish_on_conflict {
        warn!("engine.publish_on_conflict 已开启：重复投递的投注会再次发布奖励事件");
    }
    let sink = AwardSink::new(repo, publisher, config.engine.publish_on_conflict);

    let backoff = FixedBackoff::from_millis(config.engine.retry_backoff_ms);
    let (rule_tx, rule_rx) = mpsc::channel(config.engine.rule_queue_capacity);
    let (_shutdown_tx, shutdown_rx) = shutdown::install();

    // 6. 规则更新消费者（独立消费组）
    let rule_consumer = KafkaConsumer::new(&config.kafka, &config.kafka.rule_consumer_group)?;
    rule_consumer.subscribe(&[config.topics.rules.as_str()])?;
    let ingestor = tokio::spawn(
        RuleUpdateIngestor::new(rule_consumer, rule_tx, backoff).run(shutdown_rx.clone()),
    );

    // 7. 投注消费循环，运行到收到关闭信号
    let bet_consumer = KafkaConsumer::new(&config.kafka, &config.kafka.bet_consumer_group)?;
    bet_consumer.subscribe(&[config.topics.bets.as_str()])?;
    let processor = BetProcessor::new(cache, rule_rx, sink);
    let stats = BetConsumer::new(bet_consumer, processor, backoff)
        .run(shutdown_rx)
        .await;

    if let Err(e) = ingestor.await {
        error!(error = %e, "规则更新消费者异常退出");
    }

    db.close().await;
    info!(
        consumed = stats.consumed,
        awarded = stats.awarded,
        "offer-engine stopped"
    );
    Ok(())
}
