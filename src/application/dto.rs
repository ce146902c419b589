use crate::domain::entities::{StatusTransition, summarize_refunds};
use crate::domain::value_objects::{OrderStatus, RefundState, RefundStatus, SignalSource};
use crate::domain::{Order, RefundRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 创建订单请求
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    /// 商户订单号，缺省时自动生成
    pub out_trade_no: Option<String>,

    /// 支付金额（分）
    pub amount_minor_units: i64,

    /// 币种，缺省使用配置的默认币种
    pub currency: Option<String>,

    /// 商品描述
    pub description: String,

    /// 订单失效时间，缺省为当前时间加上订单有效期
    pub time_expire: Option<DateTime<Utc>>,

    /// 附加数据
    pub attach: Option<String>,

    /// 支付结果通知地址，缺省使用配置值
    pub notify_url: Option<String>,
}

/// 创建订单响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub out_trade_no: String,

    /// 二维码链接
    pub payment_target: String,

    pub status: OrderStatus,
}

impl From<&Order> for CreateOrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            out_trade_no: order.out_trade_no.clone(),
            payment_target: order.payment_target.clone(),
            status: order.status,
        }
    }
}

/// 订单视图：订单本身加上退款汇总
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub out_trade_no: String,
    pub transaction_id: Option<String>,
    pub amount_minor_units: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub description: String,
    pub time_expire: DateTime<Utc>,
    pub attach: Option<String>,
    pub payment_target: String,
    pub paid_via: Option<SignalSource>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,

    /// 退款子状态，没有退款单时为空
    pub refund_state: Option<RefundState>,

    /// 已成功退款的金额（分）
    pub refunded_minor_units: i64,

    pub refunds: Vec<RefundRecord>,
    pub history: Vec<StatusTransition>,
}

impl OrderView {
    pub fn new(order: Order, refunds: Vec<RefundRecord>) -> Self {
        let refunded_minor_units = refunds
            .iter()
            .filter(|r| r.status == RefundStatus::Succeeded)
            .map(|r| r.refund_amount_minor_units)
            .sum();

        Self {
            refund_state: summarize_refunds(&refunds),
            refunded_minor_units,
            out_trade_no: order.out_trade_no,
            transaction_id: order.transaction_id,
            amount_minor_units: order.amount.amount_minor_units,
            currency: order.amount.currency,
            status: order.status,
            description: order.description,
            time_expire: order.time_expire,
            attach: order.attach,
            payment_target: order.payment_target,
            paid_via: order.paid_via,
            paid_at: order.paid_at,
            created_at: order.created_at,
            refunds,
            history: order.history,
        }
    }
}

/// 申请退款请求
#[derive(Debug, Clone, Deserialize)]
pub struct RefundRequest {
    pub out_trade_no: String,

    /// 商户退款单号，缺省时自动生成
    pub out_refund_no: Option<String>,

    /// 退款金额（分）
    pub refund_amount_minor_units: i64,

    pub reason: Option<String>,
}

/// 回调应答，网关据此判断是否需要重发
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAnswer {
    pub code: String,
    pub message: String,
}

impl NotificationAnswer {
    pub const SUCCESS: &'static str = "SUCCESS";
    pub const FAIL: &'static str = "FAIL";

    pub fn success() -> Self {
        Self {
            code: Self::SUCCESS.to_string(),
            message: "成功".to_string(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            code: Self::FAIL.to_string(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS
    }
}

/// 错误响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Money, NewOrder};
    use chrono::Duration;

    #[test]
    fn test_order_view_sums_successful_refunds_only() {
        let now = Utc::now();
        let mut order = Order::new(
            NewOrder {
                out_trade_no: "S1".to_string(),
                amount: Money::from_minor_units(1000, "CNY"),
                description: "desc".to_string(),
                time_expire: now + Duration::minutes(5),
                attach: None,
                notify_url: "https://example.com/notify".to_string(),
            },
            "weixin://wxpay/1".to_string(),
            now,
        )
        .unwrap();
        order
            .mark_as_paid("TX1".to_string(), SignalSource::Notification, now)
            .unwrap();

        let mut ok = RefundRecord::new("R1".into(), "S1".into(), 700, None, now).unwrap();
        ok.settle(RefundStatus::Succeeded, None, now).unwrap();
        let mut failed = RefundRecord::new("R2".into(), "S1".into(), 300, None, now).unwrap();
        failed.settle(RefundStatus::Failed, None, now).unwrap();

        let view = OrderView::new(order, vec![ok, failed]);
        assert_eq!(view.status, OrderStatus::Paid);
        assert_eq!(view.refunded_minor_units, 700);
        assert_eq!(view.refund_state, Some(RefundState::Refunded));
        assert_eq!(view.history.len(), 2);
    }

    #[test]
    fn test_notification_answer_wire_shape() {
        let body = serde_json::to_value(NotificationAnswer::fail("bad signature")).unwrap();
        assert_eq!(body["code"], "FAIL");
        assert!(NotificationAnswer::success().is_success());
    }
}
