//! 订单消息处理器
//!
//! 处理结果决定 offset 是否推进：
//! - 解码失败、校验失败：记录日志后照常推进，坏消息不会阻塞分区
//! - 持久化失败：不推进，消息会被重新投递

use std::sync::Arc;

use order_hub_shared::error::HubError;
use order_hub_shared::kafka::ConsumerMessage;
use order_hub_shared::observability::metrics;
use tracing::{debug, error, warn};

use crate::error::OrderError;
use crate::models::Order;
use crate::service::OrderService;

/// 单条消息的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 已持久化
    Persisted,
    /// 负载无法解码为订单
    Malformed,
    /// 订单未通过校验
    Rejected,
    /// 存储失败，等待重投
    Failed,
}

impl ProcessOutcome {
    /// 是否可以提交该消息的 offset
    pub fn should_commit(self) -> bool {
        !matches!(self, Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Persisted => "persisted",
            Self::Malformed => "malformed",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

/// 订单消息处理器
#[derive(Clone)]
pub struct MessageProcessor {
    service: Arc<OrderService>,
}

impl MessageProcessor {
    pub fn new(service: Arc<OrderService>) -> Self {
        Self { service }
    }

    pub async fn process(&self, msg: &ConsumerMessage) -> ProcessOutcome {
        let outcome = self.handle(msg).await;
        metrics::record_order_consumed(outcome.as_str());
        outcome
    }

    async fn handle(&self, msg: &ConsumerMessage) -> ProcessOutcome {
        let order: Order = match msg.deserialize_payload() {
            Ok(order) => order,
            Err(e) => {
                warn!(
                    error = %e,
                    partition = msg.partition,
                    offset = msg.offset,
                    "订单消息无法解码，跳过"
                );
                return ProcessOutcome::Malformed;
            }
        };

        match self.service.create_order(&order).await {
            Ok(()) => {
                debug!(
                    order_uid = %order.order_uid,
                    partition = msg.partition,
                    offset = msg.offset,
                    "订单消息已处理"
                );
                ProcessOutcome::Persisted
            }
            // 数据本身的问题，重投也不会成功
            Err(OrderError::Validation(failure)) => {
                warn!(
                    order_uid = %order.order_uid,
                    reason = %failure,
                    offset = msg.offset,
                    "订单校验失败，丢弃消息"
                );
                ProcessOutcome::Rejected
            }
            Err(OrderError::Shared(HubError::Validation(reason))) => {
                warn!(order_uid = %order.order_uid, %reason, "仓储拒绝订单，丢弃消息");
                ProcessOutcome::Rejected
            }
            Err(e) => {
                error!(
                    order_uid = %order.order_uid,
                    error = %e,
                    partition = msg.partition,
                    offset = msg.offset,
                    "订单持久化失败，等待重新投递"
                );
                ProcessOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{sample_order, SAMPLE_ORDER_UID};
    use crate::repository::{InMemoryOrderRepository, MockOrderRepository, OrderRepository};
    use std::collections::HashMap;

    fn message(payload: &[u8]) -> ConsumerMessage {
        ConsumerMessage {
            topic: "orders".to_string(),
            partition: 0,
            offset: 7,
            key: None,
            payload: payload.to_vec(),
            timestamp: None,
            headers: HashMap::new(),
        }
    }

    fn processor_with(repo: Arc<dyn OrderRepository>) -> MessageProcessor {
        MessageProcessor::new(Arc::new(OrderService::new(repo)))
    }

    #[tokio::test]
    async fn test_valid_message_is_persisted() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let processor = processor_with(repo.clone());

        let payload = serde_json::to_vec(&sample_order()).unwrap();
        let outcome = processor.process(&message(&payload)).await;

        assert_eq!(outcome, ProcessOutcome::Persisted);
        assert!(outcome.should_commit());
        assert!(repo.get_by_id(SAMPLE_ORDER_UID).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_malformed_message_is_committed() {
        let processor = processor_with(Arc::new(InMemoryOrderRepository::new()));

        for payload in [&b"not json"[..], b"", b"[1,2,3]"] {
            let outcome = processor.process(&message(payload)).await;
            assert_eq!(outcome, ProcessOutcome::Malformed);
            assert!(outcome.should_commit());
        }
    }

    #[tokio::test]
    async fn test_invalid_order_is_rejected_and_committed() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let processor = processor_with(repo.clone());

        let mut order = sample_order();
        order.payment.amount = 0;
        let payload = serde_json::to_vec(&order).unwrap();

        let outcome = processor.process(&message(&payload)).await;
        assert_eq!(outcome, ProcessOutcome::Rejected);
        assert!(outcome.should_commit());
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_withholds_commit() {
        let mut repo = MockOrderRepository::new();
        repo.expect_save()
            .returning(|_| Err(HubError::timeout("orders.save")));
        repo.expect_backend().return_const("mock");

        let processor = processor_with(Arc::new(repo));
        let payload = serde_json::to_vec(&sample_order()).unwrap();

        let outcome = processor.process(&message(&payload)).await;
        assert_eq!(outcome, ProcessOutcome::Failed);
        assert!(!outcome.should_commit());
    }
}
