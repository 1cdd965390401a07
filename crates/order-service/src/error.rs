//! 订单服务错误类型
//!
//! 业务错误（订单不存在、校验失败）与基础设施错误分开定义，
//! 基础设施错误统一通过 `Shared` 透传共享库的 `HubError`。

use order_hub_shared::error::HubError;
use thiserror::Error;

use crate::validation::ValidationFailure;

/// 订单服务错误类型
#[derive(Debug, Error)]
pub enum OrderError {
    // === 业务错误 ===
    #[error("订单不存在: {0}")]
    NotFound(String),

    #[error("order_uid 不能为空")]
    EmptyOrderId,

    #[error("订单校验失败: {0}")]
    Validation(ValidationFailure),

    #[error("Kafka 生产者未启用")]
    ProducerDisabled,

    #[error("消费者状态不允许此操作: {0}")]
    InvalidConsumerState(&'static str),

    // === 基础设施错误 ===
    #[error(transparent)]
    Shared(#[from] HubError),
}

pub type Result<T> = std::result::Result<T, OrderError>;

impl OrderError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "ORDER_NOT_FOUND",
            Self::EmptyOrderId => "EMPTY_ORDER_ID",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ProducerDisabled => "PRODUCER_DISABLED",
            Self::InvalidConsumerState(_) => "INVALID_CONSUMER_STATE",
            Self::Shared(e) => e.code(),
        }
    }

    /// 是否为可重试错误（只有基础设施故障值得重试）
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<ValidationFailure> for OrderError {
    fn from(failure: ValidationFailure) -> Self {
        Self::Validation(failure)
    }
}

impl From<sqlx::Error> for OrderError {
    fn from(err: sqlx::Error) -> Self {
        Self::Shared(HubError::Database(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Order;
    use crate::validation::validate_order;

    #[test]
    fn test_error_codes() {
        assert_eq!(OrderError::NotFound("o-1".into()).code(), "ORDER_NOT_FOUND");
        assert_eq!(OrderError::EmptyOrderId.code(), "EMPTY_ORDER_ID");
        assert_eq!(
            OrderError::from(HubError::timeout("orders.save")).code(),
            "TIMEOUT"
        );
    }

    #[test]
    fn test_only_infrastructure_errors_are_retryable() {
        assert!(OrderError::from(HubError::Kafka("down".into())).is_retryable());
        assert!(OrderError::from(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!OrderError::NotFound("o-1".into()).is_retryable());
        assert!(!OrderError::ProducerDisabled.is_retryable());

        let failure = validate_order(&Order::default()).unwrap_err();
        assert!(!OrderError::from(failure).is_retryable());
    }

    #[test]
    fn test_validation_message_names_first_field() {
        let failure = validate_order(&Order::default()).unwrap_err();
        let err = OrderError::Validation(failure);
        assert!(err.to_string().starts_with("订单校验失败: order_uid"));
    }
}
