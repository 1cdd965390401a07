//! 订单聚合模型
//!
//! Order 为聚合根，拥有唯一的 Delivery、Payment 以及有序的 Item 列表。
//! JSON 字段名与上游消息格式保持一致；缺失字段按零值解码，交由校验器裁决。

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation::not_blank;

/// 订单（聚合根）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Order {
    /// 订单唯一标识，同时作为 Kafka 消息 key
    #[validate(custom(function = "not_blank", message = "order_uid 不能为空"))]
    pub order_uid: String,
    #[validate(custom(function = "not_blank", message = "track_number 不能为空"))]
    pub track_number: String,
    pub entry: String,
    #[validate(nested)]
    pub delivery: Delivery,
    #[validate(nested)]
    pub payment: Payment,
    #[validate(length(min = 1, message = "订单至少包含一件商品"), nested)]
    pub items: Vec<Item>,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    #[serde(rename = "shardkey")]
    pub shard_key: String,
    pub sm_id: i32,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

/// 收货信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate, sqlx::FromRow)]
#[serde(default)]
pub struct Delivery {
    #[validate(custom(function = "not_blank", message = "收货人姓名不能为空"))]
    pub name: String,
    #[validate(custom(function = "not_blank", message = "收货人电话不能为空"))]
    pub phone: String,
    pub zip: String,
    pub city: String,
    #[validate(custom(function = "not_blank", message = "收货地址不能为空"))]
    pub address: String,
    pub region: String,
    pub email: String,
}

/// 支付信息，金额单位为最小货币单位
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate, sqlx::FromRow)]
#[serde(default)]
pub struct Payment {
    #[validate(custom(function = "not_blank", message = "支付流水号不能为空"))]
    pub transaction: String,
    pub request_id: String,
    #[validate(custom(function = "not_blank", message = "币种不能为空"))]
    pub currency: String,
    pub provider: String,
    #[validate(range(min = 1, message = "支付金额必须大于0"))]
    pub amount: i64,
    /// Unix 秒
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    pub custom_fee: i64,
}

/// 订单商品
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate, sqlx::FromRow)]
#[serde(default)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    #[validate(range(min = 1, message = "商品价格必须大于0"))]
    pub price: i64,
    pub rid: String,
    #[validate(custom(function = "not_blank", message = "商品名称不能为空"))]
    pub name: String,
    /// 折扣百分比
    pub sale: i32,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

// ============================================================================
// 样例订单
// ============================================================================

/// 样例订单的 order_uid
pub const SAMPLE_ORDER_UID: &str = "b563feb7b2b84b6test";

/// 标准样例订单，用于预置内存存储和生产者默认消息
pub fn sample_order() -> Order {
    Order {
        order_uid: SAMPLE_ORDER_UID.to_string(),
        track_number: "WBILMTESTTRACK".to_string(),
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: "Test Testov".to_string(),
            phone: "+9720000000".to_string(),
            zip: "2639809".to_string(),
            city: "Kiryat Mozkin".to_string(),
            address: "Ploshad Mira 15".to_string(),
            region: "Kraiot".to_string(),
            email: "test@gmail.com".to_string(),
        },
        payment: Payment {
            transaction: SAMPLE_ORDER_UID.to_string(),
            request_id: String::new(),
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: 1817,
            payment_dt: 1_637_907_727,
            bank: "alpha".to_string(),
            delivery_cost: 1500,
            goods_total: 317,
            custom_fee: 0,
        },
        items: vec![Item {
            chrt_id: 9_934_930,
            track_number: "WBILMTESTTRACK".to_string(),
            price: 453,
            rid: "ab4219087a764ae0btest".to_string(),
            name: "Mascaras".to_string(),
            sale: 30,
            size: "0".to_string(),
            total_price: 317,
            nm_id: 2_389_212,
            brand: "Vivienne Sabo".to_string(),
            status: 202,
        }],
        locale: "en".to_string(),
        internal_signature: String::new(),
        customer_id: "test".to_string(),
        delivery_service: "meest".to_string(),
        shard_key: "9".to_string(),
        sm_id: 99,
        date_created: Utc
            .with_ymd_and_hms(2021, 11, 26, 6, 22, 19)
            .single()
            .unwrap_or_default(),
        oof_shard: "1".to_string(),
    }
}

/// 构造唯一的测试订单（时间戳 + 随机后缀），用于压测和引导发送
pub fn test_order() -> Order {
    let now = Utc::now();
    let suffix = format!(
        "{}_{}",
        now.format("%Y%m%d_%H%M%S"),
        &uuid::Uuid::now_v7().simple().to_string()[24..]
    );
    let track_number = format!("TEST_TRACK_{suffix}");

    Order {
        order_uid: format!("test_{suffix}"),
        track_number: track_number.clone(),
        entry: "TEST".to_string(),
        delivery: Delivery {
            name: "Test Customer".to_string(),
            phone: "+1234567890".to_string(),
            zip: "12345".to_string(),
            city: "Test City".to_string(),
            address: "123 Test Street".to_string(),
            region: "Test Region".to_string(),
            email: "test@example.com".to_string(),
        },
        payment: Payment {
            transaction: format!("test_transaction_{suffix}"),
            request_id: String::new(),
            currency: "USD".to_string(),
            provider: "test_provider".to_string(),
            amount: 1000,
            payment_dt: now.timestamp(),
            bank: "test_bank".to_string(),
            delivery_cost: 100,
            goods_total: 900,
            custom_fee: 0,
        },
        items: vec![Item {
            chrt_id: 123_456,
            track_number,
            price: 900,
            rid: format!("test_rid_{suffix}"),
            name: "Test Product".to_string(),
            sale: 0,
            size: "M".to_string(),
            total_price: 900,
            nm_id: 789_012,
            brand: "Test Brand".to_string(),
            status: 202,
        }],
        locale: "en".to_string(),
        internal_signature: String::new(),
        customer_id: "test_customer".to_string(),
        delivery_service: "test_delivery".to_string(),
        shard_key: "1".to_string(),
        sm_id: 1,
        // 与数据库 TIMESTAMPTZ 精度一致，保证读回后相等
        date_created: DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now),
        oof_shard: "1".to_string(),
    }
}
