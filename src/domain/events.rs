use crate::domain::entities::{Order, RefundRecord};
use crate::domain::value_objects::{RefundStatus, SignalSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 领域事件trait
pub trait DomainEvent {
    fn event_type(&self) -> &'static str;
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// 支付订单创建事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOrderCreated {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub order_id: Uuid,
    pub out_trade_no: String,
    pub amount: i64,
}

impl PaymentOrderCreated {
    pub fn from_order(order: &Order) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: order.created_at,
            order_id: order.id,
            out_trade_no: order.out_trade_no.clone(),
            amount: order.amount.to_minor_units(),
        }
    }
}

/// 支付成功事件，每个订单只会发出一次
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSucceeded {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub order_id: Uuid,
    pub out_trade_no: String,
    pub transaction_id: String,
    pub amount: i64,
    pub source: SignalSource,
}

impl PaymentSucceeded {
    pub fn new(order: &Order, transaction_id: &str, source: SignalSource) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: order.last_transition_at,
            order_id: order.id,
            out_trade_no: order.out_trade_no.clone(),
            transaction_id: transaction_id.to_string(),
            amount: order.amount.to_minor_units(),
            source,
        }
    }
}

/// 订单关闭或过期事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTerminated {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub out_trade_no: String,
    pub expired: bool,
}

impl OrderTerminated {
    pub fn from_order(order: &Order, expired: bool) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: order.last_transition_at,
            out_trade_no: order.out_trade_no.clone(),
            expired,
        }
    }
}

/// 退款结果事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundSettled {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub out_refund_no: String,
    pub out_trade_no: String,
    pub amount: i64,
    pub status: RefundStatus,
}

impl RefundSettled {
    pub fn from_record(record: &RefundRecord) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: record.updated_at,
            out_refund_no: record.out_refund_no.clone(),
            out_trade_no: record.out_trade_no.clone(),
            amount: record.refund_amount_minor_units,
            status: record.status,
        }
    }
}

/// 需要人工对账的异常（交易号冲突、关单后到账）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAnomaly {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub out_trade_no: String,
    pub transaction_id: String,
    pub source: SignalSource,
    pub detail: String,
}

impl PaymentAnomaly {
    pub fn new(out_trade_no: &str, transaction_id: &str, source: SignalSource, detail: String) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            out_trade_no: out_trade_no.to_string(),
            transaction_id: transaction_id.to_string(),
            source,
            detail,
        }
    }
}

/// 广播给订阅者的订单事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    Created(PaymentOrderCreated),
    Paid(PaymentSucceeded),
    Terminated(OrderTerminated),
    Refund(RefundSettled),
    Anomaly(PaymentAnomaly),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Created(_) => "PaymentOrderCreated",
            OrderEvent::Paid(_) => "PaymentSucceeded",
            OrderEvent::Terminated(e) if e.expired => "OrderExpired",
            OrderEvent::Terminated(_) => "OrderClosed",
            OrderEvent::Refund(_) => "RefundSettled",
            OrderEvent::Anomaly(_) => "PaymentAnomaly",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::Created(e) => e.occurred_at,
            OrderEvent::Paid(e) => e.occurred_at,
            OrderEvent::Terminated(e) => e.occurred_at,
            OrderEvent::Refund(e) => e.occurred_at,
            OrderEvent::Anomaly(e) => e.occurred_at,
        }
    }
}
