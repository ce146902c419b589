use crate::domain::errors::DomainResult;
use crate::domain::value_objects::{OrderRef, RefundStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 网关下单请求参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrderRequest {
    pub out_trade_no: String,
    pub description: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub time_expire: DateTime<Utc>,
    pub attach: Option<String>,
    pub notify_url: String,
}

/// 网关下单响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    /// 二维码链接等可展示的支付目标
    pub payment_target: String,
}

/// 网关交易状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeState {
    Success,
    Refund,
    NotPay,
    Closed,
    Revoked,
    UserPaying,
    PayError,
    Unknown,
}

impl TradeState {
    pub fn parse(value: &str) -> Self {
        match value {
            "SUCCESS" => TradeState::Success,
            "REFUND" => TradeState::Refund,
            "NOTPAY" => TradeState::NotPay,
            "CLOSED" => TradeState::Closed,
            "REVOKED" => TradeState::Revoked,
            "USERPAYING" => TradeState::UserPaying,
            "PAYERROR" => TradeState::PayError,
            _ => TradeState::Unknown,
        }
    }

    /// 已支付（转入退款的订单也曾支付成功）
    pub fn is_paid(self) -> bool {
        matches!(self, TradeState::Success | TradeState::Refund)
    }
}

/// 查询订单响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayTransaction {
    pub out_trade_no: String,
    pub trade_state: TradeState,
    pub transaction_id: Option<String>,
    pub trade_state_desc: Option<String>,
}

/// 退款请求参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefundRequest {
    pub out_trade_no: String,
    pub transaction_id: Option<String>,
    pub out_refund_no: String,
    pub reason: Option<String>,
    pub notify_url: String,
    pub refund_minor_units: i64,
    pub total_minor_units: i64,
    pub currency: String,
}

/// 退款结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub out_refund_no: String,
    pub refund_id: Option<String>,
    pub status: RefundStatus,
}

/// 原始回调请求：请求体和验签所需的头部
#[derive(Debug, Clone, Default)]
pub struct RawNotification {
    pub body: Vec<u8>,
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
    pub serial: String,
}

/// 解密后的回调事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    /// 支付成功
    TransactionSuccess {
        out_trade_no: String,
        transaction_id: String,
    },
    /// 其他交易事件，仅确认收到
    TransactionOther { event_type: String },
    /// 退款结果
    RefundResult {
        out_refund_no: String,
        refund_id: Option<String>,
        status: RefundStatus,
    },
}

/// 验签并解密后的回调通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedNotification {
    /// 通知ID，重发时保持不变
    pub resource_id: String,
    pub event: NotificationEvent,
}

/// 支付网关端口接口
#[async_trait]
pub trait PaymentGatewayPort: Send + Sync {
    /// 下单（Native 支付），返回 code_url
    async fn create_order(&self, request: GatewayOrderRequest) -> DomainResult<GatewayOrder>;

    /// 按商户订单号或微信支付订单号查询
    async fn query_order(&self, order_ref: &OrderRef) -> DomainResult<GatewayTransaction>;

    /// 关闭订单
    async fn close_order(&self, out_trade_no: &str) -> DomainResult<()>;

    /// 申请退款
    async fn request_refund(&self, request: GatewayRefundRequest) -> DomainResult<GatewayRefund>;

    /// 查询退款
    async fn query_refund(&self, out_refund_no: &str) -> DomainResult<GatewayRefund>;

    /// 验证回调签名并解密
    async fn verify_and_decode(&self, raw: &RawNotification) -> DomainResult<DecodedNotification>;
}
