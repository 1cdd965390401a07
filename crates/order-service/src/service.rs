//! 订单服务
//!
//! 组合校验器与仓储，对 Kafka 消费路径和直接调用路径提供同一套入口，
//! 保证两条路径的准入规则完全一致。

use std::sync::Arc;
use std::time::Instant;

use order_hub_shared::observability::metrics;
use tracing::{error, info, instrument, warn};

use crate::error::{OrderError, Result};
use crate::models::Order;
use crate::producer::OrderProducer;
use crate::repository::OrderRepository;
use crate::validation::validate_order;

/// 订单服务
pub struct OrderService {
    repo: Arc<dyn OrderRepository>,
    producer: Option<Arc<OrderProducer>>,
}

impl OrderService {
    pub fn new(repo: Arc<dyn OrderRepository>) -> Self {
        Self {
            repo,
            producer: None,
        }
    }

    /// 挂载生产者后 `publish_order` 才可用
    pub fn with_producer(mut self, producer: Arc<OrderProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// 当前仓储后端名称
    pub fn backend(&self) -> &'static str {
        self.repo.backend()
    }

    /// 按 order_uid 查询订单
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_uid: &str) -> Result<Order> {
        if order_uid.trim().is_empty() {
            return Err(OrderError::EmptyOrderId);
        }

        self.repo
            .get_by_id(order_uid)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_uid.to_string()))
    }

    /// 校验后持久化
    #[instrument(skip(self, order), fields(order_uid = %order.order_uid))]
    pub async fn create_order(&self, order: &Order) -> Result<()> {
        self.validate_order(order)?;

        let started = Instant::now();
        let result = self.repo.save(order).await;
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_order_persist(
            self.repo.backend(),
            status,
            started.elapsed().as_secs_f64(),
        );

        if let Err(e) = result {
            error!(error = %e, backend = self.repo.backend(), "订单保存失败");
            return Err(e.into());
        }

        info!(backend = self.repo.backend(), "订单创建成功");
        Ok(())
    }

    /// 全量订单，按创建时间倒序
    pub async fn get_all_orders(&self) -> Result<Vec<Order>> {
        let orders = self.repo.get_all().await?;
        info!(count = orders.len(), "已获取全部订单");
        Ok(orders)
    }

    /// 纯校验，不触碰存储
    pub fn validate_order(&self, order: &Order) -> Result<()> {
        validate_order(order).map_err(|failure| {
            warn!(
                order_uid = %order.order_uid,
                field = %failure.first().field,
                "订单校验未通过"
            );
            OrderError::Validation(failure)
        })
    }

    /// 校验后通过已挂载的生产者发布到 Kafka，返回 (partition, offset)
    pub async fn publish_order(&self, order: &Order) -> Result<(i32, i64)> {
        self.validate_order(order)?;

        let producer = self.producer.as_ref().ok_or(OrderError::ProducerDisabled)?;
        producer.send(order).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{sample_order, test_order};
    use crate::repository::{InMemoryOrderRepository, MockOrderRepository};
    use order_hub_shared::error::HubError;

    fn memory_service() -> OrderService {
        OrderService::new(Arc::new(InMemoryOrderRepository::new()))
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let service = memory_service();
        let order = test_order();

        service.create_order(&order).await.unwrap();
        assert_eq!(service.get_order(&order.order_uid).await.unwrap(), order);
    }

    #[tokio::test]
    async fn test_get_blank_id_skips_repository() {
        let mut repo = MockOrderRepository::new();
        repo.expect_get_by_id().never();

        let service = OrderService::new(Arc::new(repo));
        let err = service.get_order("  ").await.unwrap_err();
        assert!(matches!(err, OrderError::EmptyOrderId));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let mut repo = MockOrderRepository::new();
        repo.expect_get_by_id().times(1).returning(|_| Ok(None));

        let service = OrderService::new(Arc::new(repo));
        let err = service.get_order("missing").await.unwrap_err();
        assert!(matches!(err, OrderError::NotFound(ref id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_infrastructure_error_not_conflated_with_not_found() {
        let mut repo = MockOrderRepository::new();
        repo.expect_get_by_id()
            .returning(|_| Err(HubError::timeout("orders.get_by_id")));

        let service = OrderService::new(Arc::new(repo));
        let err = service.get_order("o-1").await.unwrap_err();
        assert!(matches!(err, OrderError::Shared(HubError::Timeout { .. })));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_order_never_reaches_repository() {
        let mut repo = MockOrderRepository::new();
        repo.expect_save().never();
        repo.expect_backend().return_const("mock");

        let service = OrderService::new(Arc::new(repo));
        let mut order = sample_order();
        order.items.clear();

        let err = service.create_order(&order).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_save_error_surfaces() {
        let mut repo = MockOrderRepository::new();
        repo.expect_save()
            .times(1)
            .returning(|_| Err(HubError::Database(sqlx::Error::PoolTimedOut)));
        repo.expect_backend().return_const("mock");

        let service = OrderService::new(Arc::new(repo));
        let err = service.create_order(&sample_order()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_publish_without_producer_fails() {
        let service = memory_service();
        let err = service.publish_order(&sample_order()).await.unwrap_err();
        assert!(matches!(err, OrderError::ProducerDisabled));
    }

    #[tokio::test]
    async fn test_publish_validates_first() {
        let service = memory_service().with_producer(Arc::new(OrderProducer::disabled("orders")));
        let err = service.publish_order(&Order::default()).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_get_all_orders() {
        let service = OrderService::new(Arc::new(InMemoryOrderRepository::seeded()));
        service.create_order(&test_order()).await.unwrap();

        let orders = service.get_all_orders().await.unwrap();
        assert_eq!(orders.len(), 2);
        // 测试订单创建时间晚于样例订单
        assert!(orders[0].order_uid.starts_with("test_"));
    }
}
