//! 订单服务入口
//!
//! 启动顺序：配置 -> 可观测性 -> 仓储连通性检查 -> 生产者 -> 消费协调器，
//! 收到 Ctrl+C / SIGTERM 后按相反顺序释放资源。

use std::sync::Arc;

use anyhow::Result;
use order_hub_shared::{
    config::AppConfig,
    error::HubError,
    observability,
    retry::{RetryPolicy, retry_with_policy},
};
use tokio::signal;
use tracing::{info, warn};

use order_service::{
    consumer::{ConsumerCoordinator, KafkaOrderSession, MessageProcessor},
    producer::OrderProducer,
    repository::{InMemoryOrderRepository, OrderRepository, PostgresOrderRepository},
    service::OrderService,
};

/// 启动时单次建池等待连接的上限
const STARTUP_CONNECT_TIMEOUT_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置
    let config = AppConfig::load("order-service").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });

    // 2. 初始化日志与指标
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting order-service...");
    info!(
        environment = %config.environment,
        kafka_enabled = config.kafka.enabled,
        topic = %config.kafka.topic,
        "Configuration loaded"
    );

    // 3. 选定仓储后端：PostgreSQL 不可用时降级到内存
    let database = config
        .database
        .with_connect_timeout_cap(STARTUP_CONNECT_TIMEOUT_SECS);
    let repo: Arc<dyn OrderRepository> = match retry_with_policy(
        &RetryPolicy::startup_check(),
        "postgres.connect",
        HubError::is_retryable,
        || PostgresOrderRepository::connect(&database),
    )
    .await
    {
        Ok(repo) => {
            info!("PostgreSQL repository ready");
            Arc::new(repo)
        }
        Err(e) => {
            warn!(error = %e, "PostgreSQL unavailable, falling back to in-memory repository");
            Arc::new(InMemoryOrderRepository::seeded())
        }
    };

    // 4. 生产者与订单服务
    let producer = Arc::new(OrderProducer::new(&config.kafka)?);
    let service = Arc::new(OrderService::new(repo.clone()).with_producer(producer.clone()));
    info!(backend = service.backend(), "Order service initialized");

    // 5. 消费协调器；Kafka 客户端创建失败时中止启动
    let coordinator = if config.kafka.enabled {
        let session = KafkaOrderSession::new(&config.kafka)?;
        let coordinator = ConsumerCoordinator::new(
            session,
            MessageProcessor::new(service.clone()),
            config.kafka.reconnect_backoff(),
        );
        coordinator.start()?;
        Some(coordinator)
    } else {
        warn!("Kafka disabled, consumer not started");
        None
    };

    info!("order-service started");
    shutdown_signal().await;

    // 6. 优雅关闭
    if let Some(coordinator) = &coordinator {
        coordinator.stop().await;
    }
    producer.close().await;
    repo.close().await;

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
