use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::value_objects::{Money, OrderStatus, RefundState, RefundStatus, SignalSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 状态迁移记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub at: DateTime<Utc>,
}

/// 支付订单实体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// 订单ID（内部）
    pub id: Uuid,

    /// 商户订单号
    pub out_trade_no: String,

    /// 微信支付订单号（首次确认支付后写入，之后不可变）
    pub transaction_id: Option<String>,

    /// 支付金额
    pub amount: Money,

    /// 订单状态
    pub status: OrderStatus,

    /// 商品描述
    pub description: String,

    /// 订单失效时间
    pub time_expire: DateTime<Utc>,

    /// 附加数据
    pub attach: Option<String>,

    /// 支付结果通知地址
    pub notify_url: String,

    /// 二维码链接（code_url）
    pub payment_target: String,

    /// 哪个信号把订单推进到已支付
    pub paid_via: Option<SignalSource>,

    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,

    /// 乐观锁版本号，由存储层在每次写入时递增
    #[serde(skip)]
    pub version: u64,

    pub history: Vec<StatusTransition>,
}

/// 创建订单所需的已校验参数
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub out_trade_no: String,
    pub amount: Money,
    pub description: String,
    pub time_expire: DateTime<Utc>,
    pub attach: Option<String>,
    pub notify_url: String,
}

impl NewOrder {
    pub fn validate(&self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.amount.to_minor_units() <= 0 {
            return Err(DomainError::ValidationError(
                "Amount must be greater than 0".to_string(),
            ));
        }

        if self.amount.currency.is_empty() {
            return Err(DomainError::ValidationError(
                "Currency must not be empty".to_string(),
            ));
        }

        validate_reference_no("Out trade no", &self.out_trade_no, 32)?;

        if self.description.is_empty() || self.description.chars().count() > 127 {
            return Err(DomainError::ValidationError(
                "Description must be 1-127 characters".to_string(),
            ));
        }

        if self.time_expire <= now {
            return Err(DomainError::ValidationError(format!(
                "time_expire {} is not in the future",
                self.time_expire.to_rfc3339()
            )));
        }

        if self.notify_url.is_empty() {
            return Err(DomainError::ValidationError(
                "Notify url must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// 商户单号只允许数字、大小写字母和 _-|*
fn validate_reference_no(label: &str, value: &str, max_len: usize) -> DomainResult<()> {
    if value.is_empty() || value.len() > max_len {
        return Err(DomainError::ValidationError(format!(
            "{} must be 1-{} characters",
            label, max_len
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '|' | '*'))
    {
        return Err(DomainError::ValidationError(format!(
            "{} contains invalid characters: {}",
            label, value
        )));
    }
    Ok(())
}

impl Order {
    /// 网关下单成功后构造订单
    pub fn new(new_order: NewOrder, payment_target: String, now: DateTime<Utc>) -> DomainResult<Self> {
        new_order.validate(now)?;

        Ok(Self {
            id: Uuid::new_v4(),
            out_trade_no: new_order.out_trade_no,
            transaction_id: None,
            amount: new_order.amount,
            status: OrderStatus::Created,
            description: new_order.description,
            time_expire: new_order.time_expire,
            attach: new_order.attach,
            notify_url: new_order.notify_url,
            payment_target,
            paid_via: None,
            created_at: now,
            last_transition_at: now,
            paid_at: None,
            version: 0,
            history: Vec::new(),
        })
    }

    fn transition(&mut self, next: OrderStatus, at: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidState {
                expected: format!("a state that may move to {}", next),
                actual: self.status.to_string(),
            });
        }

        self.history.push(StatusTransition {
            from: self.status,
            to: next,
            at,
        });
        self.status = next;
        self.last_transition_at = at;
        Ok(())
    }

    /// 标记为支付成功，经由来源对应的过渡态
    pub fn mark_as_paid(
        &mut self,
        transaction_id: String,
        source: SignalSource,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.status != OrderStatus::Created {
            return Err(DomainError::InvalidState {
                expected: OrderStatus::Created.to_string(),
                actual: self.status.to_string(),
            });
        }
        if transaction_id.is_empty() {
            return Err(DomainError::ValidationError(
                "Transaction id must not be empty".to_string(),
            ));
        }

        self.transition(source.transit_status(), at)?;
        self.transition(OrderStatus::Paid, at)?;
        self.transaction_id = Some(transaction_id);
        self.paid_via = Some(source);
        self.paid_at = Some(at);
        Ok(())
    }

    /// 标记为已关闭
    pub fn mark_as_closed(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.transition(OrderStatus::Closed, at)
    }

    /// 标记为已过期
    pub fn mark_as_expired(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.transition(OrderStatus::Expired, at)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Created && self.time_expire <= now
    }
}

/// 退款单实体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRecord {
    pub out_refund_no: String,
    pub out_trade_no: String,
    pub refund_amount_minor_units: i64,
    pub status: RefundStatus,
    pub reason: Option<String>,

    /// 微信支付退款单号
    pub refund_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub version: u64,
}

impl RefundRecord {
    pub fn new(
        out_refund_no: String,
        out_trade_no: String,
        refund_amount_minor_units: i64,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        validate_reference_no("Out refund no", &out_refund_no, 64)?;

        if refund_amount_minor_units <= 0 {
            return Err(DomainError::ValidationError(
                "Refund amount must be greater than 0".to_string(),
            ));
        }

        if reason.as_deref().is_some_and(|r| r.chars().count() > 80) {
            return Err(DomainError::ValidationError(
                "Refund reason must be at most 80 characters".to_string(),
            ));
        }

        Ok(Self {
            out_refund_no,
            out_trade_no,
            refund_amount_minor_units,
            status: RefundStatus::Requested,
            reason,
            refund_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// 应用网关返回的退款结果；仍在处理中时保持 REQUESTED
    pub fn settle(
        &mut self,
        outcome: RefundStatus,
        refund_id: Option<String>,
        at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        if self.status != RefundStatus::Requested {
            if self.status == outcome || outcome == RefundStatus::Requested {
                return Ok(false);
            }
            return Err(DomainError::InvalidState {
                expected: RefundStatus::Requested.to_string(),
                actual: self.status.to_string(),
            });
        }

        if refund_id.is_some() {
            self.refund_id = refund_id;
        }
        if outcome == RefundStatus::Requested {
            self.updated_at = at;
            return Ok(false);
        }

        self.status = outcome;
        self.updated_at = at;
        Ok(true)
    }

    /// 是否占用可退金额（失败的退款不占用）
    pub fn holds_amount(&self) -> bool {
        self.status != RefundStatus::Failed
    }
}

/// 汇总订单的退款子状态
pub fn summarize_refunds(records: &[RefundRecord]) -> Option<RefundState> {
    if records.is_empty() {
        return None;
    }
    if records.iter().any(|r| r.status == RefundStatus::Requested) {
        return Some(RefundState::RefundRequested);
    }
    if records.iter().any(|r| r.status == RefundStatus::Succeeded) {
        return Some(RefundState::Refunded);
    }
    Some(RefundState::RefundFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_order(out_trade_no: &str, cents: i64) -> NewOrder {
        NewOrder {
            out_trade_no: out_trade_no.to_string(),
            amount: Money::from_minor_units(cents, "CNY"),
            description: "测试商品".to_string(),
            time_expire: Utc::now() + Duration::minutes(10),
            attach: Some("cipher code".to_string()),
            notify_url: "https://example.com/notify".to_string(),
        }
    }

    #[test]
    fn test_create_order() {
        let order = Order::new(new_order("S20210219163401844556", 1000), "weixin://wxpay/1".to_string(), Utc::now())
            .unwrap();

        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(order.amount.to_minor_units(), 1000);
        assert!(order.transaction_id.is_none());
        assert!(order.history.is_empty());
    }

    #[test]
    fn test_invalid_amount() {
        let result = Order::new(new_order("ORDER123", 0), String::new(), Utc::now());
        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }

    #[test]
    fn test_time_expire_must_be_in_future() {
        let mut stale = new_order("ORDER123", 100);
        stale.time_expire = Utc::now() - Duration::seconds(1);
        assert!(Order::new(stale, String::new(), Utc::now()).is_err());
    }

    #[test]
    fn test_out_trade_no_charset() {
        assert!(Order::new(new_order("ORDER 123", 100), String::new(), Utc::now()).is_err());
        assert!(Order::new(new_order(&"A".repeat(33), 100), String::new(), Utc::now()).is_err());
    }

    #[test]
    fn test_mark_as_paid_passes_through_source_state() {
        let mut order = Order::new(new_order("ORDER123", 100), String::new(), Utc::now()).unwrap();
        order
            .mark_as_paid("TX123".to_string(), SignalSource::Query, Utc::now())
            .unwrap();

        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.transaction_id.as_deref(), Some("TX123"));
        assert_eq!(order.paid_via, Some(SignalSource::Query));
        let path: Vec<_> = order.history.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            path,
            vec![
                (OrderStatus::Created, OrderStatus::QueriedPaid),
                (OrderStatus::QueriedPaid, OrderStatus::Paid),
            ]
        );
    }

    #[test]
    fn test_closed_order_cannot_be_paid_or_expired() {
        let mut order = Order::new(new_order("ORDER123", 100), String::new(), Utc::now()).unwrap();
        order.mark_as_closed(Utc::now()).unwrap();

        assert!(order
            .mark_as_paid("TX1".to_string(), SignalSource::Notification, Utc::now())
            .is_err());
        assert!(order.mark_as_expired(Utc::now()).is_err());
        assert_eq!(order.status, OrderStatus::Closed);
        assert_eq!(order.history.len(), 1);
    }

    #[test]
    fn test_refund_settle_is_one_way() {
        let mut refund =
            RefundRecord::new("R1".to_string(), "ORDER123".to_string(), 100, None, Utc::now()).unwrap();

        assert!(!refund.settle(RefundStatus::Requested, Some("50300".to_string()), Utc::now()).unwrap());
        assert_eq!(refund.refund_id.as_deref(), Some("50300"));
        assert!(refund.settle(RefundStatus::Succeeded, None, Utc::now()).unwrap());
        assert!(!refund.settle(RefundStatus::Succeeded, None, Utc::now()).unwrap());
        assert!(refund.settle(RefundStatus::Failed, None, Utc::now()).is_err());
    }

    #[test]
    fn test_summarize_refunds() {
        let now = Utc::now();
        let mut a = RefundRecord::new("R1".into(), "O".into(), 1, None, now).unwrap();
        let mut b = RefundRecord::new("R2".into(), "O".into(), 1, None, now).unwrap();
        assert_eq!(summarize_refunds(&[]), None);
        assert_eq!(summarize_refunds(&[a.clone()]), Some(RefundState::RefundRequested));
        a.settle(RefundStatus::Failed, None, now).unwrap();
        assert_eq!(summarize_refunds(&[a.clone()]), Some(RefundState::RefundFailed));
        b.settle(RefundStatus::Succeeded, None, now).unwrap();
        assert_eq!(summarize_refunds(&[a, b]), Some(RefundState::Refunded));
    }
}
