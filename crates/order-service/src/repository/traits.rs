//! 仓储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use order_hub_shared::error::Result;

use crate::models::Order;

/// 订单仓储接口
///
/// `get_by_id` 对不存在的订单返回 `Ok(None)`，与基础设施错误严格区分。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get_by_id(&self, order_uid: &str) -> Result<Option<Order>>;

    /// 幂等写入：同一 order_uid 重复保存时整体替换
    async fn save(&self, order: &Order) -> Result<()>;

    async fn get_all(&self) -> Result<Vec<Order>>;

    /// 后端名称（postgres / memory），用于日志和指标标签
    fn backend(&self) -> &'static str;

    /// 释放底层资源
    async fn close(&self);
}
