//! 消费组协调器
//!
//! 在后台任务中反复执行消费组会话：会话因 broker 错误退出时，
//! 等待固定退避后重新加入，错误永不致命；收到关闭信号后退出循环。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use order_hub_shared::error::Result as HubResult;
use order_hub_shared::observability::metrics;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::processor::MessageProcessor;
use crate::error::{OrderError, Result};

// ---------------------------------------------------------------------------
// ReadySignal
// ---------------------------------------------------------------------------

/// 就绪信号：首次加入消费组并分到分区后置位，之后保持
#[derive(Clone)]
pub struct ReadySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ReadySignal {
    fn default() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl ReadySignal {
    pub fn mark_ready(&self) {
        if !self.tx.send_replace(true) {
            info!("消费者已就绪");
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// 等待就绪
    pub async fn wait_ready(&self) {
        let mut rx = self.tx.subscribe();
        // Sender 由自身持有，wait_for 不会因通道关闭而失败
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

// ---------------------------------------------------------------------------
// GroupConsumer
// ---------------------------------------------------------------------------

/// 一次消费组会话的抽象
#[async_trait]
pub trait GroupConsumer: Send + Sync + 'static {
    /// 加入消费组 -> 消费 -> 离开消费组
    ///
    /// 收到关闭信号时返回 `Ok(())`；broker 错误返回 `Err`，由协调器退避后重试。
    async fn run_session(
        &self,
        processor: &MessageProcessor,
        ready: &ReadySignal,
        shutdown: watch::Receiver<bool>,
    ) -> HubResult<()>;

    /// 释放 broker 资源
    async fn close(&self);
}

// ---------------------------------------------------------------------------
// ConsumerCoordinator
// ---------------------------------------------------------------------------

/// 消费组协调器
pub struct ConsumerCoordinator<C: GroupConsumer> {
    consumer: Arc<C>,
    processor: MessageProcessor,
    ready: ReadySignal,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
    reconnect_backoff: Duration,
}

impl<C: GroupConsumer> ConsumerCoordinator<C> {
    pub fn new(consumer: C, processor: MessageProcessor, reconnect_backoff: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            consumer: Arc::new(consumer),
            processor,
            ready: ReadySignal::default(),
            shutdown_tx,
            task: Mutex::new(None),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reconnect_backoff,
        }
    }

    /// 启动后台消费循环，立即返回；只能启动一次
    pub fn start(&self) -> Result<()> {
        if *self.shutdown_tx.borrow() {
            return Err(OrderError::InvalidConsumerState("协调器已停止"));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(OrderError::InvalidConsumerState("协调器已在运行"));
        }

        let handle = tokio::spawn(run_loop(
            self.consumer.clone(),
            self.processor.clone(),
            self.ready.clone(),
            self.shutdown_tx.subscribe(),
            self.reconnect_backoff,
        ));
        *self.task.lock() = Some(handle);

        info!(
            backoff_secs = self.reconnect_backoff.as_secs(),
            "消费协调器已启动"
        );
        Ok(())
    }

    /// 发出关闭信号，等待消费循环（含正在处理的消息）结束后释放资源；可重复调用
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);

        let handle = self.task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(error = %e, "消费循环异常退出");
        }

        if !self.closed.swap(true, Ordering::SeqCst) {
            self.consumer.close().await;
            info!("消费协调器已停止");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    pub fn ready_signal(&self) -> ReadySignal {
        self.ready.clone()
    }
}

async fn run_loop<C: GroupConsumer>(
    consumer: Arc<C>,
    processor: MessageProcessor,
    ready: ReadySignal,
    mut shutdown: watch::Receiver<bool>,
    backoff: Duration,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match consumer
            .run_session(&processor, &ready, shutdown.clone())
            .await
        {
            Ok(()) => {
                if *shutdown.borrow() {
                    break;
                }
                // 会话因 rebalance 等原因正常结束，立即重新加入
                debug!("消费组会话结束，重新加入");
            }
            Err(e) => {
                metrics::record_session_restart();
                warn!(
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "消费组会话出错，退避后重试"
                );

                tokio::select! {
                    biased;

                    _ = shutdown.wait_for(|stop| *stop) => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    info!("消费循环已退出");
}
