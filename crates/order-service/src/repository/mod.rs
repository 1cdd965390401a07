//! 订单仓储层
//!
//! 两种实现共享同一接口：
//!
//! - `PostgresOrderRepository`：四表事务写入，持久化存储
//! - `InMemoryOrderRepository`：读写锁保护的内存映射，数据库不可用时降级使用
//!
//! 后端在启动时通过连通性检查选定一次，运行期间不切换。

mod memory;
mod postgres;
mod traits;

pub use memory::InMemoryOrderRepository;
pub use postgres::PostgresOrderRepository;
pub use traits::*;

use crate::models::Order;

/// 统一的列表排序：date_created 倒序，相同时按 order_uid 升序
pub(crate) fn sort_newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| {
        b.date_created
            .cmp(&a.date_created)
            .then_with(|| a.order_uid.cmp(&b.order_uid))
    });
}
