//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息序列化、错误映射和 offset 管理，避免各服务重复编写样板代码。

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::KafkaConfig;
use crate::error::{HubError, Result};

/// 消息头名称
pub mod headers {
    pub const CONTENT_TYPE: &str = "content-type";
    pub const TIMESTAMP: &str = "timestamp";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
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
    pub fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let timestamp = msg.timestamp().to_millis();

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
            timestamp,
            headers,
        }
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
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
    send_timeout: Duration,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// acks=all：所有 ISR 副本确认后才算成功；客户端内部重试 `producer_retries` 次。
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("acks", "all")
            .set("message.send.max.retries", config.producer_retries.to_string())
            .set("compression.type", &config.compression)
            .set("request.timeout.ms", config.producer_timeout_ms.to_string())
            // 整体投递时限需覆盖全部重试
            .set(
                "message.timeout.ms",
                (config.producer_timeout_ms * (u64::from(config.producer_retries) + 1))
                    .to_string(),
            )
            .create()
            .map_err(|e| HubError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            retries = config.producer_retries,
            compression = %config.compression,
            "Kafka 生产者已初始化"
        );
        Ok(Self {
            producer,
            send_timeout: Duration::from_millis(config.producer_timeout_ms),
        })
    }

    /// 发送原始字节消息，等待 broker 确认后返回 (partition, offset)
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &[(&str, &str)],
    ) -> Result<(i32, i64)> {
        let owned_headers = headers
            .iter()
            .fold(OwnedHeaders::new(), |acc, (name, value)| {
                acc.insert(Header {
                    key: *name,
                    value: Some(*value),
                })
            });

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload)
            .headers(owned_headers);

        // rdkafka 0.39+ 返回 Delivery 结构体而非元组
        let delivery = self
            .producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(e, _)| HubError::Kafka(format!("发送消息失败: {e}")))?;

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
    /// 自动附带 content-type 与发布时间（RFC 3339）消息头。
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64)> {
        let payload = serde_json::to_vec(value)?;
        let published_at = chrono::Utc::now().to_rfc3339();

        self.send(
            topic,
            key,
            &payload,
            &[
                (headers::CONTENT_TYPE, "application/json"),
                (headers::TIMESTAMP, published_at.as_str()),
            ],
        )
        .await
    }

    /// 刷出客户端缓冲区中尚未投递的消息
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer.flush(timeout)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RebalanceContext
// ---------------------------------------------------------------------------

/// 消费者上下文：把 rebalance 结果广播到 watch channel
///
/// 值为当前分配到的分区数，0 表示尚未加入或已被收回。
pub struct RebalanceContext {
    assigned: watch::Sender<usize>,
}

impl RebalanceContext {
    fn new() -> (Self, watch::Receiver<usize>) {
        let (assigned, rx) = watch::channel(0);
        (Self { assigned }, rx)
    }
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                info!(partitions = tpl.count(), "消费组分区已分配");
                self.assigned.send_replace(tpl.count());
            }
            Rebalance::Revoke(tpl) => {
                info!(partitions = tpl.count(), "消费组分区已收回");
                self.assigned.send_replace(0);
            }
            Rebalance::Error(e) => {
                warn!(error = %e, "消费组 rebalance 出错");
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(e) = result {
            warn!(error = %e, "提交 offset 失败");
        }
    }
}

// ---------------------------------------------------------------------------
// KafkaGroupConsumer
// ---------------------------------------------------------------------------

/// 消费组成员
///
/// 自动提交开启，但 offset 只在调用方显式 `store_offset` 后才会被提交，
/// 未存储的消息在重新加入消费组后会被再次投递。
pub struct KafkaGroupConsumer {
    consumer: StreamConsumer<RebalanceContext>,
    assignments: watch::Receiver<usize>,
    seek_timeout: Duration,
}

impl KafkaGroupConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let (context, assignments) = RebalanceContext::new();

        let consumer: StreamConsumer<RebalanceContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("partition.assignment.strategy", "roundrobin")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("heartbeat.interval.ms", config.heartbeat_interval_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string())
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                config.auto_commit_interval_ms.to_string(),
            )
            .set("enable.auto.offset.store", "false")
            .create_with_context(context)
            .map_err(|e| HubError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            "Kafka 消费者已初始化"
        );
        Ok(Self {
            consumer,
            assignments,
            seek_timeout: Duration::from_secs(5),
        })
    }

    /// 订阅 topic（加入消费组）
    pub fn subscribe(&self, topic: &str) -> Result<()> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| HubError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(topic, "已订阅 Kafka topic");
        Ok(())
    }

    /// 取消订阅（离开消费组）
    pub fn unsubscribe(&self) {
        self.consumer.unsubscribe();
        info!("已取消 Kafka 订阅");
    }

    /// 分区分配变化的订阅端
    pub fn assignments(&self) -> watch::Receiver<usize> {
        self.assignments.clone()
    }

    /// 拉取下一条消息（可在 select! 中安全取消）
    ///
    /// 单条消息级别的错误只记日志并继续拉取，其余错误返回给调用方。
    pub async fn recv(&self) -> Result<ConsumerMessage> {
        loop {
            match self.consumer.recv().await {
                Ok(msg) => return Ok(ConsumerMessage::from_borrowed(&msg)),
                Err(e) if is_transient_consume_error(&e) => {
                    warn!(error = %e, "接收 Kafka 消息出错，继续拉取");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 标记消息已处理完成，下一次自动提交会推进到它之后
    pub fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))?;
        self.consumer.store_offsets(&tpl)?;
        Ok(())
    }

    /// 暂停单个分区的拉取，其它分区不受影响
    pub fn pause(&self, topic: &str, partition: i32) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(topic, partition);
        self.consumer.pause(&tpl)?;
        debug!(topic, partition, "分区拉取已暂停");
        Ok(())
    }

    /// 恢复单个分区的拉取
    pub fn resume(&self, topic: &str, partition: i32) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(topic, partition);
        self.consumer.resume(&tpl)?;
        debug!(topic, partition, "分区拉取已恢复");
        Ok(())
    }

    /// 将分区的拉取位置回退到指定 offset，使该消息被重新投递
    pub fn seek(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        self.consumer
            .seek(topic, partition, Offset::Offset(offset), self.seek_timeout)?;
        debug!(topic, partition, offset, "分区拉取位置已回退");
        Ok(())
    }
}

/// 只影响单条消息的消费错误（topic 不存在、分区末尾、拉取出错等），不必重新加入消费组
fn is_transient_consume_error(err: &KafkaError) -> bool {
    matches!(
        err,
        KafkaError::MessageConsumption(_) | KafkaError::PartitionEOF(_)
    )
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
