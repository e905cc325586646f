//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息序列化、错误映射和位点提交语义，避免各进程重复编写样板代码。
//!
//! 消费者关闭了自动提交：位点只在调用方处理完一条消息后显式提交，
//! 进程在处理与提交之间崩溃时，重启后会重新消费该消息（至少一次）。

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::KafkaConfig;
use crate::error::{OfferError, Result};

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数，处理完成后再据此提交位点。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 构造一条只含负载的消息，供内存消息源和测试使用
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload,
            timestamp: None,
            headers: HashMap::new(),
        }
    }

    /// 负载的日志预览：最多取前 `max_bytes` 字节，非 UTF-8 字节按替换字符显示
    ///
    /// 超长时截断并注明原始长度。
    pub fn payload_preview(&self, max_bytes: usize) -> Cow<'_, str> {
        if self.payload.len() <= max_bytes {
            return String::from_utf8_lossy(&self.payload);
        }
        let head = String::from_utf8_lossy(&self.payload[..max_bytes]);
        Cow::Owned(format!("{head}...(已截断，共 {} 字节)", self.payload.len()))
    }

    /// 将 JSON 格式负载反序列化为目标类型
    ///
    /// 失败时返回 `Decode` 错误：这是坏消息，不是传输故障。
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| OfferError::Decode(format!("负载反序列化失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// MessageSource
// ---------------------------------------------------------------------------

/// 可逐条拉取、逐条提交的消息源
///
/// 处理循环只依赖此 trait，生产环境由 `KafkaConsumer` 实现，测试中使用内存队列。
#[async_trait]
pub trait MessageSource: Send {
    /// 阻塞直到拿到下一条消息或发生读取错误
    async fn fetch(&mut self) -> Result<ConsumerMessage>;

    /// 提交该消息的位点，使消费组的持久读位置越过它
    async fn commit(&mut self, msg: &ConsumerMessage) -> Result<()>;
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer` 并提供类型安全的 JSON 发送方法，
/// 内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// `message.timeout.ms` 取自配置：超时仍无法投递时返回错误，由调用方决定如何处理。
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let timeout_ms = config.producer_timeout_ms.to_string();
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", &timeout_ms)
            .create()
            .map_err(|e| OfferError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            timeout: Duration::from_millis(config.producer_timeout_ms),
        })
    }

    /// 发送原始字节消息
    pub async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(i32, i64)> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        // rdkafka 0.39+ 返回 Delivery 结构体而非元组
        let delivery = self
            .producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| OfferError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    ///
    /// 序列化与网络发送拆分为两步，便于独立定位故障原因。
    pub async fn send_json<T: Serialize + Sync>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64)> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| OfferError::Internal(format!("序列化失败: {e}")))?;

        self.send(topic, key, &payload).await
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 手动提交位点的 Kafka 消费者
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// 每条消费路径使用独立的消费组（投注流、规则流各一个），
    /// 因此由调用方显式传入 group_id。
    pub fn new(config: &KafkaConfig, group_id: &str) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| OfferError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self {
            consumer,
            group_id: group_id.to_string(),
        })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<()> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| OfferError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, group_id = %self.group_id, "已订阅 Kafka topics");
        Ok(())
    }
}

#[async_trait]
impl MessageSource for KafkaConsumer {
    async fn fetch(&mut self) -> Result<ConsumerMessage> {
        let borrowed = self
            .consumer
            .recv()
            .await
            .map_err(|e| OfferError::Kafka(format!("接收消息失败: {e}")))?;

        let msg = ConsumerMessage::from_borrowed(&borrowed);
        debug!(
            topic = %msg.topic,
            partition = msg.partition,
            offset = msg.offset,
            "收到 Kafka 消息"
        );
        Ok(msg)
    }

    async fn commit(&mut self, msg: &ConsumerMessage) -> Result<()> {
        // Kafka 提交的是"下一条要读的位点"
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&msg.topic, msg.partition, Offset::Offset(msg.offset + 1))
            .map_err(|e| OfferError::Kafka(format!("构造提交位点失败: {e}")))?;

        // 同步提交保证位点在处理下一条前落盘；多线程运行时上让出工作线程
        let consumer = &self.consumer;
        run_blocking(|| consumer.commit(&tpl, CommitMode::Sync))
            .map_err(|e| OfferError::Kafka(format!("提交位点失败: {e}")))
    }
}

/// 在异步上下文中执行阻塞调用
///
/// 多线程运行时通过 `block_in_place` 把当前工作线程交出去，其余任务不被饿死；
/// 单线程运行时不支持 `block_in_place`，直接在原地执行。
fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

// ---------------------------------------------------------------------------
// Topic 初始化
// ---------------------------------------------------------------------------

/// 确保 topic 存在
///
/// 启动时创建缺失的 topic，避免消费者订阅尚不存在的 topic 时拿不到元数据。
/// topic 已存在不算错误；其他失败只记录日志，由 broker 的自动建 topic 兜底。
pub async fn ensure_topics(config: &KafkaConfig, topics: &[&str]) -> Result<()> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .create()
        .map_err(|e| OfferError::Kafka(format!("创建 admin client 失败: {e}")))?;

    let new_topics: Vec<NewTopic<'_>> = topics
        .iter()
        .map(|name| NewTopic::new(name, 1, TopicReplication::Fixed(1)))
        .collect();

    let results = admin
        .create_topics(&new_topics, &AdminOptions::new())
        .await
        .map_err(|e| OfferError::Kafka(format!("创建 topic 失败: {e}")))?;

    for result in results {
        match result {
            Ok(topic) => info!(topic = %topic, "已创建 Kafka topic"),
            Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                debug!(topic = %topic, "Kafka topic 已存在")
            }
            Err((topic, code)) => warn!(topic = %topic, error = %code, "创建 Kafka topic 失败"),
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
