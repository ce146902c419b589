use serde::{Deserialize, Serialize};
use std::fmt;

/// 订单主状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 已下单，等待支付
    Created,
    /// 回调通知确认已支付（过渡态）
    NotifiedPaid,
    /// 主动查询确认已支付（过渡态）
    QueriedPaid,
    /// 支付成功
    Paid,
    /// 已关闭
    Closed,
    /// 已过期
    Expired,
}

impl OrderStatus {
    /// 状态机允许的迁移边
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Created, NotifiedPaid)
                | (Created, QueriedPaid)
                | (Created, Closed)
                | (Created, Expired)
                | (NotifiedPaid, Paid)
                | (QueriedPaid, Paid)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::NotifiedPaid => "NOTIFIED_PAID",
            OrderStatus::QueriedPaid => "QUERIED_PAID",
            OrderStatus::Paid => "PAID",
            OrderStatus::Closed => "CLOSED",
            OrderStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATED" => Some(OrderStatus::Created),
            "NOTIFIED_PAID" => Some(OrderStatus::NotifiedPaid),
            "QUERIED_PAID" => Some(OrderStatus::QueriedPaid),
            "PAID" => Some(OrderStatus::Paid),
            "CLOSED" => Some(OrderStatus::Closed),
            "EXPIRED" => Some(OrderStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 支付信号来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalSource {
    Notification,
    Query,
}

impl SignalSource {
    /// 该来源对应的过渡状态
    pub fn transit_status(self) -> OrderStatus {
        match self {
            SignalSource::Notification => OrderStatus::NotifiedPaid,
            SignalSource::Query => OrderStatus::QueriedPaid,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalSource::Notification => "NOTIFICATION",
            SignalSource::Query => "QUERY",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NOTIFICATION" => Some(SignalSource::Notification),
            "QUERY" => Some(SignalSource::Query),
            _ => None,
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 退款单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Requested,
    Succeeded,
    Failed,
}

impl RefundStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RefundStatus::Requested => "REQUESTED",
            RefundStatus::Succeeded => "SUCCEEDED",
            RefundStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "REQUESTED" => Some(RefundStatus::Requested),
            "SUCCEEDED" => Some(RefundStatus::Succeeded),
            "FAILED" => Some(RefundStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 订单视图上的退款子状态（由退款单汇总得到，不影响主状态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundState {
    RefundRequested,
    Refunded,
    RefundFailed,
}

/// 订单定位方式：商户订单号或微信支付订单号
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    OutTradeNo(String),
    TransactionId(String),
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderRef::OutTradeNo(no) => write!(f, "out_trade_no={}", no),
            OrderRef::TransactionId(id) => write!(f, "transaction_id={}", id),
        }
    }
}

/// 货币金额（最小货币单位，避免浮点数精度问题）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// 金额（分）
    pub amount_minor_units: i64,

    /// 币种，如 CNY
    pub currency: String,
}

impl Money {
    pub fn from_minor_units(amount_minor_units: i64, currency: impl Into<String>) -> Self {
        Self {
            amount_minor_units,
            currency: currency.into(),
        }
    }

    pub fn to_minor_units(&self) -> i64 {
        self.amount_minor_units
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.amount_minor_units / 100,
            (self.amount_minor_units % 100).abs(),
            self.currency
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_display() {
        let money = Money::from_minor_units(1001, "CNY");
        assert_eq!(money.to_minor_units(), 1001);
        assert_eq!(format!("{}", money), "10.01 CNY");
    }

    #[test]
    fn test_only_forward_edges_are_allowed() {
        use OrderStatus::*;
        assert!(Created.can_transition_to(NotifiedPaid));
        assert!(QueriedPaid.can_transition_to(Paid));
        assert!(Created.can_transition_to(Expired));

        assert!(!Created.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Created));
        assert!(!Closed.can_transition_to(NotifiedPaid));
        assert!(!Expired.can_transition_to(Closed));
        assert!(!Paid.can_transition_to(Closed));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            OrderStatus::Created,
            OrderStatus::NotifiedPaid,
            OrderStatus::QueriedPaid,
            OrderStatus::Paid,
            OrderStatus::Closed,
            OrderStatus::Expired,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("succeeded"), None);
    }
}
