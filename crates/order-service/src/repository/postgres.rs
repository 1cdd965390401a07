//! PostgreSQL 订单仓储
//!
//! 订单聚合拆分为 orders / deliveries / payments / items 四张表：
//! 写入在单个事务内完成（前三张表冲突时覆盖，商品先删后插），
//! 读取同样在单个只读事务内完成，保证看到的是同一时刻的聚合。

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use order_hub_shared::config::DatabaseConfig;
use order_hub_shared::database::Database;
use order_hub_shared::error::{HubError, Result};
use sqlx::{PgConnection, Postgres, Transaction};
use tracing::{debug, info, instrument};

use super::traits::OrderRepository;
use crate::models::{Delivery, Item, Order, Payment};

/// 单条读取的时限
const GET_TIMEOUT: Duration = Duration::from_secs(5);
/// 单次写入事务的时限
const SAVE_TIMEOUT: Duration = Duration::from_secs(10);
/// 全量读取的时限
const GET_ALL_TIMEOUT: Duration = Duration::from_secs(30);

// ==================== 行结构 ====================

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_uid: String,
    track_number: String,
    entry: String,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: i32,
    date_created: DateTime<Utc>,
    oof_shard: String,
}

impl OrderRow {
    fn into_order(self, delivery: Delivery, payment: Payment, items: Vec<Item>) -> Order {
        Order {
            order_uid: self.order_uid,
            track_number: self.track_number,
            entry: self.entry,
            delivery,
            payment,
            items,
            locale: self.locale,
            internal_signature: self.internal_signature,
            customer_id: self.customer_id,
            delivery_service: self.delivery_service,
            shard_key: self.shardkey,
            sm_id: self.sm_id,
            date_created: self.date_created,
            oof_shard: self.oof_shard,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    order_uid: String,
    #[sqlx(flatten)]
    delivery: Delivery,
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    order_uid: String,
    #[sqlx(flatten)]
    payment: Payment,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    order_uid: String,
    #[sqlx(flatten)]
    item: Item,
}

const ORDER_COLUMNS: &str = "order_uid, track_number, entry, locale, internal_signature, \
     customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard";
const DELIVERY_COLUMNS: &str = "order_uid, name, phone, zip, city, address, region, email";
const PAYMENT_COLUMNS: &str = "order_uid, transaction, request_id, currency, provider, amount, \
     payment_dt, bank, delivery_cost, goods_total, custom_fee";
const ITEM_COLUMNS: &str = "order_uid, chrt_id, track_number, price, rid, name, sale, size, \
     total_price, nm_id, brand, status";

/// 超时即视为基础设施错误；future 被丢弃时未提交的事务随之回滚
async fn with_deadline<T>(
    operation: &str,
    deadline: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(HubError::timeout(operation)),
    }
}

/// 开启只读快照事务
async fn begin_snapshot(db: &Database) -> Result<Transaction<'static, Postgres>> {
    let mut tx = db.pool().begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// PostgreSQL 订单仓储
pub struct PostgresOrderRepository {
    db: Database,
}

impl PostgresOrderRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// 建立连接池并做一次连通性检查，任一步失败都返回错误
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let db = Database::connect(config).await?;
        if let Err(e) = db.health_check().await {
            db.close().await;
            return Err(e);
        }
        Ok(Self::new(db))
    }

    async fn load_one(&self, order_uid: &str) -> Result<Option<Order>> {
        let mut tx = begin_snapshot(&self.db).await?;

        let Some(row) = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_uid = $1"
        ))
        .bind(order_uid)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };

        // 子表缺行时按零值处理
        let delivery = sqlx::query_as::<_, DeliveryRow>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE order_uid = $1"
        ))
        .bind(order_uid)
        .fetch_optional(&mut *tx)
        .await?
        .map(|r| r.delivery)
        .unwrap_or_default();

        let payment = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_uid = $1"
        ))
        .bind(order_uid)
        .fetch_optional(&mut *tx)
        .await?
        .map(|r| r.payment)
        .unwrap_or_default();

        let items = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE order_uid = $1 ORDER BY id"
        ))
        .bind(order_uid)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|r| r.item)
        .collect();

        tx.commit().await?;

        Ok(Some(row.into_order(delivery, payment, items)))
    }

    async fn load_all(&self) -> Result<Vec<Order>> {
        let mut tx = begin_snapshot(&self.db).await?;

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY date_created DESC, order_uid"
        ))
        .fetch_all(&mut *tx)
        .await?;

        let mut deliveries: HashMap<String, Delivery> =
            sqlx::query_as::<_, DeliveryRow>(&format!("SELECT {DELIVERY_COLUMNS} FROM deliveries"))
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(|r| (r.order_uid, r.delivery))
                .collect();

        let mut payments: HashMap<String, Payment> =
            sqlx::query_as::<_, PaymentRow>(&format!("SELECT {PAYMENT_COLUMNS} FROM payments"))
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(|r| (r.order_uid, r.payment))
                .collect();

        let mut items: HashMap<String, Vec<Item>> = HashMap::new();
        for row in sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items ORDER BY order_uid, id"
        ))
        .fetch_all(&mut *tx)
        .await?
        {
            items.entry(row.order_uid).or_default().push(row.item);
        }

        tx.commit().await?;

        let orders = rows
            .into_iter()
            .map(|row| {
                let uid = row.order_uid.as_str();
                let delivery = deliveries.remove(uid).unwrap_or_default();
                let payment = payments.remove(uid).unwrap_or_default();
                let order_items = items.remove(uid).unwrap_or_default();
                row.into_order(delivery, payment, order_items)
            })
            .collect();

        Ok(orders)
    }

    async fn store(&self, order: &Order) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        upsert_order(&mut tx, order).await?;
        upsert_delivery(&mut tx, order).await?;
        upsert_payment(&mut tx, order).await?;
        replace_items(&mut tx, order).await?;

        tx.commit().await?;
        Ok(())
    }
}

// ==================== 写入语句 ====================

async fn upsert_order(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            order_uid, track_number, entry, locale, internal_signature,
            customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (order_uid) DO UPDATE SET
            track_number = EXCLUDED.track_number,
            entry = EXCLUDED.entry,
            locale = EXCLUDED.locale,
            internal_signature = EXCLUDED.internal_signature,
            customer_id = EXCLUDED.customer_id,
            delivery_service = EXCLUDED.delivery_service,
            shardkey = EXCLUDED.shardkey,
            sm_id = EXCLUDED.sm_id,
            date_created = EXCLUDED.date_created,
            oof_shard = EXCLUDED.oof_shard
        "#,
    )
    .bind(&order.order_uid)
    .bind(&order.track_number)
    .bind(&order.entry)
    .bind(&order.locale)
    .bind(&order.internal_signature)
    .bind(&order.customer_id)
    .bind(&order.delivery_service)
    .bind(&order.shard_key)
    .bind(order.sm_id)
    .bind(order.date_created)
    .bind(&order.oof_shard)
    .execute(conn)
    .await?;

    Ok(())
}

async fn upsert_delivery(conn: &mut PgConnection, order: &Order) -> Result<()> {
    let d = &order.delivery;
    sqlx::query(
        r#"
        INSERT INTO deliveries (order_uid, name, phone, zip, city, address, region, email)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (order_uid) DO UPDATE SET
            name = EXCLUDED.name,
            phone = EXCLUDED.phone,
            zip = EXCLUDED.zip,
            city = EXCLUDED.city,
            address = EXCLUDED.address,
            region = EXCLUDED.region,
            email = EXCLUDED.email
        "#,
    )
    .bind(&order.order_uid)
    .bind(&d.name)
    .bind(&d.phone)
    .bind(&d.zip)
    .bind(&d.city)
    .bind(&d.address)
    .bind(&d.region)
    .bind(&d.email)
    .execute(conn)
    .await?;

    Ok(())
}

async fn upsert_payment(conn: &mut PgConnection, order: &Order) -> Result<()> {
    let p = &order.payment;
    sqlx::query(
        r#"
        INSERT INTO payments (
            order_uid, transaction, request_id, currency, provider, amount,
            payment_dt, bank, delivery_cost, goods_total, custom_fee
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (order_uid) DO UPDATE SET
            transaction = EXCLUDED.transaction,
            request_id = EXCLUDED.request_id,
            currency = EXCLUDED.currency,
            provider = EXCLUDED.provider,
            amount = EXCLUDED.amount,
            payment_dt = EXCLUDED.payment_dt,
            bank = EXCLUDED.bank,
            delivery_cost = EXCLUDED.delivery_cost,
            goods_total = EXCLUDED.goods_total,
            custom_fee = EXCLUDED.custom_fee
        "#,
    )
    .bind(&order.order_uid)
    .bind(&p.transaction)
    .bind(&p.request_id)
    .bind(&p.currency)
    .bind(&p.provider)
    .bind(p.amount)
    .bind(p.payment_dt)
    .bind(&p.bank)
    .bind(p.delivery_cost)
    .bind(p.goods_total)
    .bind(p.custom_fee)
    .execute(conn)
    .await?;

    Ok(())
}

/// 商品没有自然主键，整体替换：先删后插
async fn replace_items(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query("DELETE FROM items WHERE order_uid = $1")
        .bind(&order.order_uid)
        .execute(&mut *conn)
        .await?;

    for item in &order.items {
        sqlx::query(
            r#"
            INSERT INTO items (
                order_uid, chrt_id, track_number, price, rid, name, sale,
                size, total_price, nm_id, brand, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&order.order_uid)
        .bind(item.chrt_id)
        .bind(&item.track_number)
        .bind(item.price)
        .bind(&item.rid)
        .bind(&item.name)
        .bind(item.sale)
        .bind(&item.size)
        .bind(item.total_price)
        .bind(item.nm_id)
        .bind(&item.brand)
        .bind(item.status)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    #[instrument(skip(self))]
    async fn get_by_id(&self, order_uid: &str) -> Result<Option<Order>> {
        with_deadline("orders.get_by_id", GET_TIMEOUT, self.load_one(order_uid)).await
    }

    #[instrument(skip(self, order), fields(order_uid = %order.order_uid))]
    async fn save(&self, order: &Order) -> Result<()> {
        if order.order_uid.trim().is_empty() {
            return Err(HubError::Validation("order_uid 不能为空".to_string()));
        }

        with_deadline("orders.save", SAVE_TIMEOUT, self.store(order)).await?;

        debug!(items = order.items.len(), "订单已写入 PostgreSQL");
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Order>> {
        let orders = with_deadline("orders.get_all", GET_ALL_TIMEOUT, self.load_all()).await?;
        debug!(count = orders.len(), "已加载全部订单");
        Ok(orders)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn close(&self) {
        self.db.close().await;
        info!("PostgreSQL 订单仓储已关闭");
    }
}
