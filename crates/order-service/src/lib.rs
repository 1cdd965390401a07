//! 订单服务
//!
//! 从 Kafka 消费订单消息，校验后写入 PostgreSQL；数据库不可用时降级为内存存储。
//!
//! ## 核心功能
//!
//! - **订单校验**：必填字段、金额与商品数量的准入规则
//! - **订单持久化**：四表事务写入，按 order_uid 幂等覆盖
//! - **消费组协调**：断线退避重连，持久化失败时不提交 offset 并重新投递
//! - **订单发送**：acks=all 的同步发送与后台异步发送
//!
//! ## 模块结构
//!
//! - `models`: 订单聚合模型与样例订单
//! - `validation`: 订单校验
//! - `error`: 错误类型定义
//! - `repository`: 仓储层（PostgreSQL / 内存）
//! - `service`: 订单服务门面
//! - `consumer`: 消费组协调器、会话与消息处理器
//! - `producer`: 订单生产者

pub mod consumer;
pub mod error;
pub mod models;
pub mod producer;
pub mod repository;
pub mod service;
pub mod validation;

pub use consumer::{ConsumerCoordinator, KafkaOrderSession, MessageProcessor, ProcessOutcome};
pub use error::{OrderError, Result};
pub use models::{Delivery, Item, Order, Payment};
pub use producer::OrderProducer;
pub use service::OrderService;
