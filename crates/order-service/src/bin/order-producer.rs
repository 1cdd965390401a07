//! 订单生产者命令行工具
//!
//! 默认发送样例订单；`--test` 发送 N 条唯一测试订单；`--file` 发送 JSON 文件中的订单。

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use order_hub_shared::{config::AppConfig, observability};
use tracing::{info, warn};

use order_service::models::{Order, sample_order};
use order_service::producer::OrderProducer;

/// 测试订单之间的发送间隔
const TEST_ORDER_INTERVAL: Duration = Duration::from_millis(100);

/// 订单生产者
#[derive(Parser, Debug)]
#[command(name = "order-producer")]
#[command(version, about = "向 Kafka 发送订单消息")]
struct Cli {
    /// 发送唯一的测试订单
    #[arg(long, conflicts_with = "file")]
    test: bool,

    /// 测试订单数量（配合 --test 使用）
    #[arg(short, long, default_value_t = 1)]
    count: u32,

    /// 从 JSON 文件读取订单
    #[arg(short, long)]
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load("order-producer").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });

    // 命令行工具不导出指标，避免与服务抢占端口
    let mut obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    obs_config.metrics_enabled = false;
    let _guard = observability::init(&obs_config).await?;

    if !config.kafka.enabled {
        bail!("Kafka 未启用，无法发送订单（检查 kafka.enabled 配置）");
    }

    let producer = OrderProducer::new(&config.kafka)?;
    info!(brokers = %config.kafka.brokers, topic = producer.topic(), "Producer ready");

    let result = run(&cli, &producer).await;
    producer.close().await;
    result
}

async fn run(cli: &Cli, producer: &OrderProducer) -> anyhow::Result<()> {
    if cli.test {
        let mut failed = 0u32;
        for i in 0..cli.count {
            if i > 0 {
                tokio::time::sleep(TEST_ORDER_INTERVAL).await;
            }
            if let Err(e) = producer.send_test_order().await {
                warn!(index = i, error = %e, "测试订单发送失败");
                failed += 1;
            }
        }

        info!(total = cli.count, failed, "测试订单发送完成");
        if failed > 0 {
            bail!("{failed}/{} 条测试订单发送失败", cli.count);
        }
        return Ok(());
    }

    let order = match &cli.file {
        Some(path) => read_order(path)?,
        None => sample_order(),
    };

    let (partition, offset) = producer.send(&order).await?;
    info!(order_uid = %order.order_uid, partition, offset, "订单发送完成");
    Ok(())
}

fn read_order(path: &Path) -> anyhow::Result<Order> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取订单文件失败: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("订单文件不是合法的订单 JSON: {}", path.display()))
}
