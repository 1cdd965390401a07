//! 内存订单仓储
//!
//! 单把读写锁保护的 order_uid -> Order 映射：写入互斥，读取并发。

use std::collections::HashMap;

use async_trait::async_trait;
use order_hub_shared::error::{HubError, Result};
use parking_lot::RwLock;
use tracing::{debug, info};

use super::sort_newest_first;
use super::traits::OrderRepository;
use crate::models::{Order, sample_order};

/// 内存订单仓储
#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<String, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置样例订单，作为数据库不可用时的降级存储
    pub fn seeded() -> Self {
        let repo = Self::new();
        let sample = sample_order();
        info!(order_uid = %sample.order_uid, "内存仓储已预置样例订单");
        repo.orders.write().insert(sample.order_uid.clone(), sample);
        repo
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn get_by_id(&self, order_uid: &str) -> Result<Option<Order>> {
        Ok(self.orders.read().get(order_uid).cloned())
    }

    async fn save(&self, order: &Order) -> Result<()> {
        if order.order_uid.trim().is_empty() {
            return Err(HubError::Validation("order_uid 不能为空".to_string()));
        }

        self.orders
            .write()
            .insert(order.order_uid.clone(), order.clone());

        debug!(order_uid = %order.order_uid, "订单已写入内存仓储");
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self.orders.read().values().cloned().collect();
        sort_newest_first(&mut orders);
        Ok(orders)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SAMPLE_ORDER_UID, test_order};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_save_then_get_returns_equal_order() {
        let repo = InMemoryOrderRepository::new();
        let order = test_order();

        repo.save(&order).await.unwrap();
        let loaded = repo.get_by_id(&order.order_uid).await.unwrap();

        assert_eq!(loaded, Some(order));
    }

    #[tokio::test]
    async fn test_get_unknown_returns_none() {
        let repo = InMemoryOrderRepository::seeded();
        assert!(repo.get_by_id("missing").await.unwrap().is_none());
        assert!(repo.get_by_id(SAMPLE_ORDER_UID).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let repo = InMemoryOrderRepository::new();
        let mut order = test_order();
        repo.save(&order).await.unwrap();

        order.track_number = "REPLACED".to_string();
        order.items.truncate(0);
        repo.save(&order).await.unwrap();

        assert_eq!(repo.len(), 1);
        let loaded = repo.get_by_id(&order.order_uid).await.unwrap().unwrap();
        assert_eq!(loaded.track_number, "REPLACED");
        assert!(loaded.items.is_empty());
    }

    #[tokio::test]
    async fn test_blank_order_uid_rejected() {
        let repo = InMemoryOrderRepository::new();
        let order = Order {
            order_uid: "   ".to_string(),
            ..test_order()
        };

        let err = repo.save(&order).await.unwrap_err();
        assert!(matches!(err, HubError::Validation(_)));
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_get_all_orders_newest_first() {
        let repo = InMemoryOrderRepository::new();
        let now = Utc::now();

        let mut old = test_order();
        old.order_uid = "old".to_string();
        old.date_created = now - Duration::hours(1);

        let mut tie_b = test_order();
        tie_b.order_uid = "b".to_string();
        tie_b.date_created = now;

        let mut tie_a = tie_b.clone();
        tie_a.order_uid = "a".to_string();

        for order in [&old, &tie_b, &tie_a] {
            repo.save(order).await.unwrap();
        }

        let uids: Vec<String> = repo
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.order_uid)
            .collect();
        assert_eq!(uids, ["a", "b", "old"]);
    }
}
