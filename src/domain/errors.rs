use thiserror::Error;

/// 领域层错误类型
#[derive(Error, Debug)]
pub enum DomainError {
    /// 验证错误（在调用网关前拒绝）
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// 网关返回的错误，原样携带 status/code/message
    #[error("Gateway error: status={status}, code={code}, message={message}")]
    GatewayError {
        status: u16,
        code: String,
        message: String,
    },

    /// 订单未找到
    #[error("Payment order not found: {0}")]
    OrderNotFound(String),

    /// 退款单未找到
    #[error("Refund not found: {0}")]
    RefundNotFound(String),

    /// 同一订单出现两个不同的微信支付订单号
    #[error("Conflicting transaction id for order {out_trade_no}: recorded {recorded}, received {received}")]
    Conflict {
        out_trade_no: String,
        recorded: String,
        received: String,
    },

    /// 订单关闭或过期后收到支付信号
    #[error("Late payment signal for order {out_trade_no} in state {status} (transaction {transaction_id})")]
    LateSignal {
        out_trade_no: String,
        status: String,
        transaction_id: String,
    },

    /// 订单状态错误
    #[error("Invalid order state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// 累计退款金额超过已支付金额
    #[error("Refund amount exceeded: requested {requested}, refundable {refundable}")]
    AmountExceeded { requested: i64, refundable: i64 },

    /// 回调通知验签或解密失败
    #[error("Notification verification failed: {0}")]
    VerificationError(String),

    /// 超过调用方给定的截止时间
    #[error("Deadline exceeded while {0}")]
    Timeout(String),

    /// 存储层版本冲突
    #[error("Concurrent modification of {0}")]
    ConcurrentModification(String),

    /// 数据库错误
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// HTTP请求错误
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// 加密错误
    #[error("Cryptography error: {0}")]
    CryptoError(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl DomainError {
    pub fn gateway(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::GatewayError {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// 稳定的错误码，用于接口响应
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::ValidationError(_) => "VALIDATION_ERROR",
            DomainError::GatewayError { .. } => "GATEWAY_ERROR",
            DomainError::OrderNotFound(_) | DomainError::RefundNotFound(_) => "NOT_FOUND",
            DomainError::Conflict { .. } => "CONFLICT",
            DomainError::LateSignal { .. } => "LATE_SIGNAL",
            DomainError::InvalidState { .. } => "INVALID_STATE",
            DomainError::AmountExceeded { .. } => "AMOUNT_EXCEEDED",
            DomainError::VerificationError(_) => "VERIFICATION_ERROR",
            DomainError::Timeout(_) => "TIMEOUT",
            DomainError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            _ => "INTERNAL_ERROR",
        }
    }
}

/// 领域结果类型
pub type DomainResult<T> = Result<T, DomainError>;
