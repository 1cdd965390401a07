//! Kafka 订单消费
//!
//! - `processor`：单条消息的解码 -> 校验 -> 持久化，并决定是否推进 offset
//! - `coordinator`：消费组生命周期（启动、失败重连、就绪信号、优雅关闭）
//! - `session`：消费组会话（加入 -> 按分区消费 -> 离开），失败的分区暂停后回退重投

mod coordinator;
mod processor;
mod session;

pub use coordinator::{ConsumerCoordinator, GroupConsumer, ReadySignal};
pub use processor::{MessageProcessor, ProcessOutcome};
pub use session::{GroupClient, KafkaOrderSession};
