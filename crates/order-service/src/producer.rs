//! 订单生产者
//!
//! 同步发送等待全部副本确认（acks=all），失败时由客户端有限次重试后返回明确错误；
//! 异步发送在后台任务中完成，失败只记日志。
//! Kafka 关闭时构造出的是禁用状态的生产者：发送返回 `ProducerDisabled`，关闭为空操作。

use std::time::Duration;

use order_hub_shared::config::KafkaConfig;
use order_hub_shared::kafka::KafkaProducer;
use order_hub_shared::observability::metrics;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::{OrderError, Result};
use crate::models::{Order, test_order};

/// 关闭时等待缓冲区刷出的时限
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// 订单生产者
pub struct OrderProducer {
    inner: Option<KafkaProducer>,
    topic: String,
    pending: Mutex<JoinSet<()>>,
}

impl OrderProducer {
    /// 按配置创建；`kafka.enabled = false` 时返回禁用状态的生产者
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        if !config.enabled {
            info!("Kafka 未启用，生产者处于禁用状态");
            return Ok(Self::disabled(&config.topic));
        }

        Ok(Self {
            inner: Some(KafkaProducer::new(config)?),
            topic: config.topic.clone(),
            pending: Mutex::new(JoinSet::new()),
        })
    }

    pub fn disabled(topic: &str) -> Self {
        Self {
            inner: None,
            topic: topic.to_string(),
            pending: Mutex::new(JoinSet::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 发送订单并等待确认，返回 (partition, offset)
    ///
    /// key 为 order_uid，保证同一订单的消息落在同一分区。
    pub async fn send(&self, order: &Order) -> Result<(i32, i64)> {
        let producer = self.inner.as_ref().ok_or(OrderError::ProducerDisabled)?;

        match producer
            .send_json(&self.topic, &order.order_uid, order)
            .await
        {
            Ok((partition, offset)) => {
                metrics::record_order_published("success");
                info!(
                    order_uid = %order.order_uid,
                    topic = %self.topic,
                    partition,
                    offset,
                    "订单已发送"
                );
                Ok((partition, offset))
            }
            Err(e) => {
                metrics::record_order_published("error");
                error!(order_uid = %order.order_uid, error = %e, "订单发送失败");
                Err(e.into())
            }
        }
    }

    /// 后台发送，不等待结果
    pub fn send_async(&self, order: Order) {
        let Some(producer) = self.inner.clone() else {
            warn!(order_uid = %order.order_uid, "生产者未启用，丢弃异步发送");
            return;
        };
        let topic = self.topic.clone();

        let mut pending = self.pending.lock();
        // 回收已完成的任务
        while pending.try_join_next().is_some() {}

        pending.spawn(async move {
            match producer.send_json(&topic, &order.order_uid, &order).await {
                Ok((partition, offset)) => {
                    metrics::record_order_published("success");
                    info!(order_uid = %order.order_uid, partition, offset, "订单已异步发送");
                }
                Err(e) => {
                    metrics::record_order_published("error");
                    error!(order_uid = %order.order_uid, error = %e, "订单异步发送失败");
                }
            }
        });
    }

    /// 发送一条新生成的唯一测试订单
    pub async fn send_test_order(&self) -> Result<(i32, i64)> {
        self.send(&test_order()).await
    }

    /// 等待所有异步发送完成并刷出缓冲区，可重复调用
    pub async fn close(&self) {
        let Some(producer) = self.inner.clone() else {
            return;
        };

        let mut pending = std::mem::take(&mut *self.pending.lock());
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "异步发送任务异常结束");
            }
        }

        // flush 是阻塞调用
        match tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT)).await {
            Ok(Ok(())) => info!("Kafka 生产者已关闭"),
            Ok(Err(e)) => warn!(error = %e, "刷出生产者缓冲区失败"),
            Err(e) => warn!(error = %e, "刷出任务异常结束"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_order;

    #[tokio::test]
    async fn test_disabled_producer_send_errors() {
        let producer = OrderProducer::disabled("orders");
        assert!(!producer.is_enabled());

        let err = producer.send(&sample_order()).await.unwrap_err();
        assert!(matches!(err, OrderError::ProducerDisabled));

        let err = producer.send_test_order().await.unwrap_err();
        assert!(matches!(err, OrderError::ProducerDisabled));
    }

    #[tokio::test]
    async fn test_disabled_producer_close_is_safe_twice() {
        let producer = OrderProducer::disabled("orders");
        producer.send_async(sample_order());
        producer.close().await;
        producer.close().await;
    }

    #[tokio::test]
    async fn test_config_disabled_builds_disabled_producer() {
        let config = KafkaConfig {
            enabled: false,
            topic: "orders-test".to_string(),
            ..KafkaConfig::default()
        };
        let producer = OrderProducer::new(&config).unwrap();
        assert!(!producer.is_enabled());
        assert_eq!(producer.topic(), "orders-test");
    }
}
