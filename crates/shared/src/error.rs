//! 统一错误处理模块
//!
//! 定义基础设施层共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 业务层错误（订单不存在、校验失败等）由各服务自行定义，并通过 `#[from]` 透传本类型。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum HubError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    // ==================== 序列化错误 ====================
    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 超时 ====================
    #[error("操作超时: {operation}")]
    Timeout { operation: String },

    // ==================== 参数错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, HubError>;

impl HubError {
    /// 构造超时错误
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 只有传输层/基础设施故障才值得重试，数据本身的问题重试多少次结果都一样。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Kafka(_) | Self::Timeout { .. }
        )
    }
}

impl From<config::ConfigError> for HubError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<rdkafka::error::KafkaError> for HubError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Self::Kafka(err.to_string())
    }
}
