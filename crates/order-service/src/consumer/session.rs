//! 基于 rdkafka 的消费组会话
//!
//! 一次会话分三步：订阅（加入消费组）、按分区顺序消费、取消订阅（离开消费组）。
//! 消息处理成功或被判定为坏消息时存储 offset，由客户端周期性提交；
//! 持久化失败时只暂停该分区，等待重投间隔后把拉取位置回退到失败的 offset 再恢复，
//! 其它分区在此期间照常消费。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use order_hub_shared::config::KafkaConfig;
use order_hub_shared::error::{HubError, Result};
use order_hub_shared::kafka::{ConsumerMessage, KafkaGroupConsumer};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::coordinator::{GroupConsumer, ReadySignal};
use super::processor::MessageProcessor;

// ---------------------------------------------------------------------------
// GroupClient
// ---------------------------------------------------------------------------

/// 会话依赖的消费组客户端操作
#[async_trait]
pub trait GroupClient: Send + Sync + 'static {
    fn subscribe(&self, topic: &str) -> Result<()>;

    fn unsubscribe(&self);

    /// 当前分配到的分区数，rebalance 时变化
    fn assignments(&self) -> watch::Receiver<usize>;

    async fn recv(&self) -> Result<ConsumerMessage>;

    fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<()>;

    fn seek(&self, topic: &str, partition: i32, offset: i64) -> Result<()>;

    fn pause(&self, topic: &str, partition: i32) -> Result<()>;

    fn resume(&self, topic: &str, partition: i32) -> Result<()>;
}

#[async_trait]
impl GroupClient for KafkaGroupConsumer {
    fn subscribe(&self, topic: &str) -> Result<()> {
        KafkaGroupConsumer::subscribe(self, topic)
    }

    fn unsubscribe(&self) {
        KafkaGroupConsumer::unsubscribe(self)
    }

    fn assignments(&self) -> watch::Receiver<usize> {
        KafkaGroupConsumer::assignments(self)
    }

    async fn recv(&self) -> Result<ConsumerMessage> {
        KafkaGroupConsumer::recv(self).await
    }

    fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        KafkaGroupConsumer::store_offset(self, topic, partition, offset)
    }

    fn seek(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        KafkaGroupConsumer::seek(self, topic, partition, offset)
    }

    fn pause(&self, topic: &str, partition: i32) -> Result<()> {
        KafkaGroupConsumer::pause(self, topic, partition)
    }

    fn resume(&self, topic: &str, partition: i32) -> Result<()> {
        KafkaGroupConsumer::resume(self, topic, partition)
    }
}

// ---------------------------------------------------------------------------
// PartitionClaims
// ---------------------------------------------------------------------------

type PartitionKey = (String, i32);

/// 单个分区的回退状态
#[derive(Debug, Clone, Copy)]
struct Rewind {
    /// 等待重新投递的 offset
    offset: i64,
    /// 到期后 seek 并恢复拉取；`None` 表示已恢复，等待该消息重新到达
    resume_at: Option<Instant>,
}

/// 按分区记录回退状态
///
/// 暂停前已拉到本地缓冲区的后续消息仍会到达，需要跳过，
/// 直到回退的那条消息重新出现。
#[derive(Debug, Default)]
struct PartitionClaims {
    rewinds: HashMap<PartitionKey, Rewind>,
}

impl PartitionClaims {
    /// 返回 false 表示该消息是回退前的缓冲消息，应当跳过
    fn admit(&mut self, msg: &ConsumerMessage) -> bool {
        let key = (msg.topic.clone(), msg.partition);
        match self.rewinds.get(&key) {
            Some(rewind) if rewind.resume_at.is_some() || msg.offset > rewind.offset => false,
            Some(_) => {
                self.rewinds.remove(&key);
                true
            }
            None => true,
        }
    }

    fn rewind(&mut self, msg: &ConsumerMessage, resume_at: Instant) {
        self.rewinds.insert(
            (msg.topic.clone(), msg.partition),
            Rewind {
                offset: msg.offset,
                resume_at: Some(resume_at),
            },
        );
    }

    /// 最早到期的恢复时间
    fn next_resume(&self) -> Option<Instant> {
        self.rewinds.values().filter_map(|r| r.resume_at).min()
    }

    /// 取出已到期的分区，返回 (topic, partition, offset)
    fn take_due(&mut self, now: Instant) -> Vec<(String, i32, i64)> {
        let mut due = Vec::new();
        for ((topic, partition), rewind) in self.rewinds.iter_mut() {
            if rewind.resume_at.is_some_and(|at| at <= now) {
                rewind.resume_at = None;
                due.push((topic.clone(), *partition, rewind.offset));
            }
        }
        due
    }

    /// 分区重新分配后旧的回退状态失效
    fn reset(&mut self) {
        self.rewinds.clear();
    }
}

// ---------------------------------------------------------------------------
// KafkaOrderSession
// ---------------------------------------------------------------------------

/// Kafka 消费组会话
pub struct KafkaOrderSession<C: GroupClient = KafkaGroupConsumer> {
    client: C,
    topic: String,
    redelivery_delay: Duration,
}

impl KafkaOrderSession<KafkaGroupConsumer> {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        Ok(Self::with_client(
            KafkaGroupConsumer::new(config)?,
            &config.topic,
            config.redelivery_delay(),
        ))
    }
}

impl<C: GroupClient> KafkaOrderSession<C> {
    pub fn with_client(client: C, topic: &str, redelivery_delay: Duration) -> Self {
        Self {
            client,
            topic: topic.to_string(),
            redelivery_delay,
        }
    }

    async fn consume(
        &self,
        processor: &MessageProcessor,
        ready: &ReadySignal,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut assignments = self.client.assignments();
        if *assignments.borrow_and_update() > 0 {
            ready.mark_ready();
        }

        let mut claims = PartitionClaims::default();

        loop {
            let next_resume = claims.next_resume();

            tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，结束消费组会话");
                        return Ok(());
                    }
                }

                changed = assignments.changed() => {
                    if changed.is_err() {
                        return Err(HubError::Kafka("rebalance 通知通道已关闭".to_string()));
                    }
                    let partitions = *assignments.borrow_and_update();
                    claims.reset();
                    if partitions > 0 {
                        ready.mark_ready();
                    }
                }

                _ = tokio::time::sleep_until(next_resume.unwrap_or_else(Instant::now)),
                    if next_resume.is_some() =>
                {
                    for (topic, partition, offset) in claims.take_due(Instant::now()) {
                        self.client.seek(&topic, partition, offset)?;
                        self.client.resume(&topic, partition)?;
                        debug!(partition, offset, "分区已回退并恢复拉取");
                    }
                }

                received = self.client.recv() => {
                    let msg = received?;

                    if !claims.admit(&msg) {
                        debug!(
                            partition = msg.partition,
                            offset = msg.offset,
                            "跳过回退前的缓冲消息"
                        );
                        continue;
                    }

                    let outcome = processor.process(&msg).await;
                    if outcome.should_commit() {
                        self.client
                            .store_offset(&msg.topic, msg.partition, msg.offset)?;
                        continue;
                    }

                    warn!(
                        partition = msg.partition,
                        offset = msg.offset,
                        delay_ms = self.redelivery_delay.as_millis() as u64,
                        "消息未提交，暂停分区等待重新投递"
                    );
                    self.client.pause(&msg.topic, msg.partition)?;
                    claims.rewind(&msg, Instant::now() + self.redelivery_delay);
                }
            }
        }
    }
}

#[async_trait]
impl<C: GroupClient> GroupConsumer for KafkaOrderSession<C> {
    async fn run_session(
        &self,
        processor: &MessageProcessor,
        ready: &ReadySignal,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        if *shutdown.borrow() {
            return Ok(());
        }

        self.client.subscribe(&self.topic)?;
        let result = self.consume(processor, ready, shutdown).await;
        self.client.unsubscribe();

        result
    }

    async fn close(&self) {
        self.client.unsubscribe();
        info!(topic = %self.topic, "Kafka 消费者已关闭");
    }
}
