//! Kafka 端到端测试
//!
//! 生产者发送订单 -> 消费组会话拉取 -> 处理器校验并写入内存仓储 -> 通过服务查询。
//!
//! ## 运行方式
//!
//! ```bash
//! KAFKA_BROKERS=localhost:9092 \
//!   cargo test -p order-service --test kafka_e2e_test -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use order_hub_shared::config::KafkaConfig;
use order_service::consumer::{ConsumerCoordinator, KafkaOrderSession, MessageProcessor};
use order_service::models::{SAMPLE_ORDER_UID, sample_order, test_order};
use order_service::producer::OrderProducer;
use order_service::repository::InMemoryOrderRepository;
use order_service::{OrderError, OrderService};

fn kafka_config() -> KafkaConfig {
    let brokers =
        std::env::var("KAFKA_BROKERS").expect("KAFKA_BROKERS must be set for integration tests");
    KafkaConfig {
        brokers,
        topic: std::env::var("KAFKA_TOPIC").unwrap_or_else(|_| "orders-e2e".to_string()),
        // 每次运行使用独立消费组，避免读到其它运行留下的提交位置
        consumer_group: format!("order-service-e2e-{}", uuid::Uuid::now_v7().simple()),
        auto_offset_reset: "earliest".to_string(),
        reconnect_backoff_secs: 1,
        redelivery_delay_ms: 200,
        ..KafkaConfig::default()
    }
}

/// 轮询直到订单可查或超时
async fn wait_for_order(service: &OrderService, order_uid: &str) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while tokio::time::Instant::now() < deadline {
        match service.get_order(order_uid).await {
            Ok(_) => return true,
            Err(OrderError::NotFound(_)) => tokio::time::sleep(Duration::from_millis(200)).await,
            Err(e) => panic!("查询订单失败: {e}"),
        }
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "需要 KAFKA_BROKERS 指向的 Kafka"]
async fn test_published_order_reaches_repository() {
    let config = kafka_config();
    let repo = Arc::new(InMemoryOrderRepository::new());
    let producer = Arc::new(OrderProducer::new(&config).unwrap());
    let service = Arc::new(OrderService::new(repo.clone()).with_producer(producer.clone()));

    let coordinator = ConsumerCoordinator::new(
        KafkaOrderSession::new(&config).unwrap(),
        MessageProcessor::new(service.clone()),
        config.reconnect_backoff(),
    );
    coordinator.start().unwrap();
    tokio::time::timeout(Duration::from_secs(30), coordinator.ready_signal().wait_ready())
        .await
        .expect("消费者未能加入消费组");

    // 坏消息在前，不应阻塞后续订单
    let mut invalid = test_order();
    invalid.payment.currency.clear();
    producer.send(&invalid).await.unwrap();

    let (_, offset) = service.publish_order(&sample_order()).await.unwrap();
    assert!(offset >= 0);
    let order = test_order();
    producer.send(&order).await.unwrap();

    assert!(wait_for_order(&service, SAMPLE_ORDER_UID).await);
    assert!(wait_for_order(&service, &order.order_uid).await);
    assert!(matches!(
        service.get_order(&invalid.order_uid).await,
        Err(OrderError::NotFound(_))
    ));

    coordinator.stop().await;
    producer.close().await;
}

#[tokio::test]
#[ignore = "需要 KAFKA_BROKERS 指向的 Kafka"]
async fn test_send_test_order_returns_position() {
    let config = kafka_config();
    let producer = OrderProducer::new(&config).unwrap();

    let (partition, offset) = producer.send_test_order().await.unwrap();
    assert!(partition >= 0);
    assert!(offset >= 0);

    producer.send_async(test_order());
    producer.close().await;
    producer.close().await;
}
