use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::value_objects::{OrderRef, RefundStatus};
use crate::infrastructure::adapters::notification_payload::{NotificationEnvelope, decode_event};
use crate::ports::payment_gateway_port::*;
use async_trait::async_trait;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// 模拟网关的操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    CreateOrder,
    QueryOrder,
    CloseOrder,
    RequestRefund,
    QueryRefund,
}

/// 预设的一次性失败
#[derive(Debug, Clone)]
pub struct MockFailure {
    pub status: u16,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone)]
struct MockTrade {
    trade_state: TradeState,
    transaction_id: Option<String>,
    created: Instant,
}

/// 进程内模拟网关，用于本地联调和测试
pub struct MockGatewayAdapter {
    signing_key: String,
    auto_pay_after: Option<Duration>,
    trades: DashMap<String, MockTrade>,
    refunds: DashMap<String, GatewayRefund>,
    failures: DashMap<MockOperation, MockFailure>,
    calls: DashMap<MockOperation, usize>,
    latency_ms: AtomicU64,
    sequence: AtomicU64,
    refund_outcome: Mutex<RefundStatus>,
}

impl MockGatewayAdapter {
    pub fn new(signing_key: impl Into<String>) -> Self {
        Self {
            signing_key: signing_key.into(),
            auto_pay_after: None,
            trades: DashMap::new(),
            refunds: DashMap::new(),
            failures: DashMap::new(),
            calls: DashMap::new(),
            latency_ms: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            refund_outcome: Mutex::new(RefundStatus::Succeeded),
        }
    }

    /// 下单后经过给定时长，查询时视为用户已扫码支付
    pub fn with_auto_pay(mut self, after: Duration) -> Self {
        self.auto_pay_after = Some(after);
        self
    }

    fn mac(&self, timestamp: &str, nonce: &str, body: &[u8]) -> DomainResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.signing_key.as_bytes())
            .map_err(|e| DomainError::ConfigurationError(format!("Invalid mock signing key: {}", e)))?;
        mac.update(format!("{}\n{}\n", timestamp, nonce).as_bytes());
        mac.update(body);
        mac.update(b"\n");
        Ok(mac)
    }

    async fn enter(&self, operation: MockOperation) -> DomainResult<()> {
        *self.calls.entry(operation).or_insert(0) += 1;

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if let Some((_, failure)) = self.failures.remove(&operation) {
            debug!(?operation, code = %failure.code, "Mock gateway returning scripted failure");
            return Err(DomainError::gateway(failure.status, failure.code, failure.message));
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}{:020}", prefix, self.sequence.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn settle_payment(&self, trade: &mut MockTrade) -> String {
        if let Some(transaction_id) = &trade.transaction_id {
            return transaction_id.clone();
        }
        let transaction_id = self.next_id("42");
        trade.trade_state = TradeState::Success;
        trade.transaction_id = Some(transaction_id.clone());
        transaction_id
    }

    fn not_found(what: &str) -> DomainError {
        DomainError::gateway(404, "ORDER_NOT_EXIST", format!("{} does not exist", what))
    }
}

#[async_trait]
impl PaymentGatewayPort for MockGatewayAdapter {
    async fn create_order(&self, request: GatewayOrderRequest) -> DomainResult<GatewayOrder> {
        self.enter(MockOperation::CreateOrder).await?;

        if self.trades.contains_key(&request.out_trade_no) {
            return Err(DomainError::gateway(
                400,
                "OUT_TRADE_NO_USED",
                format!("out_trade_no {} already used", request.out_trade_no),
            ));
        }

        self.trades.insert(
            request.out_trade_no.clone(),
            MockTrade {
                trade_state: TradeState::NotPay,
                transaction_id: None,
                created: Instant::now(),
            },
        );

        Ok(GatewayOrder {
            payment_target: format!(
                "weixin://wxpay/bizpayurl?pr={}",
                uuid::Uuid::new_v4().simple()
            ),
        })
    }

    async fn query_order(&self, order_ref: &OrderRef) -> DomainResult<GatewayTransaction> {
        self.enter(MockOperation::QueryOrder).await?;

        let out_trade_no = match order_ref {
            OrderRef::OutTradeNo(no) => no.clone(),
            OrderRef::TransactionId(id) => self
                .trades
                .iter()
                .find(|entry| entry.transaction_id.as_deref() == Some(id.as_str()))
                .map(|entry| entry.key().clone())
                .ok_or_else(|| Self::not_found(&order_ref.to_string()))?,
        };

        let mut trade = self
            .trades
            .get_mut(&out_trade_no)
            .ok_or_else(|| Self::not_found(&order_ref.to_string()))?;

        if let Some(after) = self.auto_pay_after {
            if trade.trade_state == TradeState::NotPay && trade.created.elapsed() >= after {
                self.settle_payment(&mut trade);
            }
        }

        Ok(GatewayTransaction {
            out_trade_no,
            trade_state: trade.trade_state,
            transaction_id: trade.transaction_id.clone(),
            trade_state_desc: None,
        })
    }

    async fn close_order(&self, out_trade_no: &str) -> DomainResult<()> {
        self.enter(MockOperation::CloseOrder).await?;

        let mut trade = self
            .trades
            .get_mut(out_trade_no)
            .ok_or_else(|| Self::not_found(out_trade_no))?;
        if trade.trade_state.is_paid() {
            return Err(DomainError::gateway(400, "ORDERPAID", "order already paid"));
        }
        trade.trade_state = TradeState::Closed;
        Ok(())
    }

    async fn request_refund(&self, request: GatewayRefundRequest) -> DomainResult<GatewayRefund> {
        self.enter(MockOperation::RequestRefund).await?;

        if let Some(existing) = self.refunds.get(&request.out_refund_no) {
            return Ok(existing.clone());
        }

        let mut trade = self
            .trades
            .get_mut(&request.out_trade_no)
            .ok_or_else(|| Self::not_found(&request.out_trade_no))?;
        if !trade.trade_state.is_paid() {
            return Err(DomainError::gateway(403, "TRADE_NOT_PAID", "trade is not paid"));
        }

        let status = self
            .refund_outcome
            .lock()
            .map(|outcome| *outcome)
            .unwrap_or(RefundStatus::Succeeded);
        if status == RefundStatus::Succeeded {
            trade.trade_state = TradeState::Refund;
        }

        let refund = GatewayRefund {
            out_refund_no: request.out_refund_no.clone(),
            refund_id: Some(self.next_id("50")),
            status,
        };
        self.refunds.insert(request.out_refund_no, refund.clone());
        Ok(refund)
    }

    async fn query_refund(&self, out_refund_no: &str) -> DomainResult<GatewayRefund> {
        self.enter(MockOperation::QueryRefund).await?;

        self.refunds
            .get(out_refund_no)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                DomainError::gateway(404, "RESOURCE_NOT_EXISTS", format!("refund {} does not exist", out_refund_no))
            })
    }

    async fn verify_and_decode(&self, raw: &RawNotification) -> DomainResult<DecodedNotification> {
        let signature = hex::decode(&raw.signature)
            .map_err(|_| DomainError::VerificationError("Signature is not hex".to_string()))?;
        self.mac(&raw.timestamp, &raw.nonce, &raw.body)?
            .verify_slice(&signature)
            .map_err(|_| DomainError::VerificationError("Signature mismatch".to_string()))?;

        let envelope: NotificationEnvelope<serde_json::Value> = serde_json::from_slice(&raw.body)
            .map_err(|e| DomainError::VerificationError(format!("Malformed notification: {}", e)))?;
        let event = decode_event(&envelope.event_type, &envelope.resource.to_string())?;

        Ok(DecodedNotification {
            resource_id: envelope.id,
            event,
        })
    }
}

#[cfg(test)]
impl MockGatewayAdapter {
    /// 对 `timestamp\nnonce\nbody\n` 做 HMAC-SHA256，返回十六进制串
    pub fn sign(&self, timestamp: &str, nonce: &str, body: &[u8]) -> DomainResult<String> {
        Ok(hex::encode(self.mac(timestamp, nonce, body)?.finalize().into_bytes()))
    }

    /// 模拟用户扫码支付，返回微信支付订单号
    pub fn pay(&self, out_trade_no: &str) -> String {
        let mut trade = self.trades.get_mut(out_trade_no).expect("unknown trade");
        self.settle_payment(&mut trade)
    }

    pub fn fail_next(&self, operation: MockOperation, status: u16, code: &str, message: &str) {
        self.failures.insert(
            operation,
            MockFailure {
                status,
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_refund_outcome(&self, status: RefundStatus) {
        *self.refund_outcome.lock().unwrap() = status;
    }

    pub fn set_refund_status(&self, out_refund_no: &str, status: RefundStatus) {
        if let Some(mut refund) = self.refunds.get_mut(out_refund_no) {
            refund.status = status;
        }
    }

    pub fn calls(&self, operation: MockOperation) -> usize {
        self.calls.get(&operation).map(|entry| *entry.value()).unwrap_or(0)
    }

    /// 构造带有效签名的回调请求
    pub fn signed_notification(&self, body: serde_json::Value) -> RawNotification {
        let body = body.to_string().into_bytes();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let signature = self.sign(&timestamp, &nonce, &body).unwrap();
        RawNotification {
            body,
            timestamp,
            nonce,
            signature,
            serial: "MOCK".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn order_request(out_trade_no: &str) -> GatewayOrderRequest {
        GatewayOrderRequest {
            out_trade_no: out_trade_no.to_string(),
            description: "for testing".to_string(),
            amount_minor_units: 1,
            currency: "CNY".to_string(),
            time_expire: Utc::now() + chrono::Duration::minutes(10),
            attach: None,
            notify_url: "https://example.com/notify".to_string(),
        }
    }

    #[tokio::test]
    async fn test_scripted_failure_is_one_shot() {
        let gateway = MockGatewayAdapter::new("key");
        gateway.fail_next(MockOperation::CreateOrder, 500, "SYSTEM_ERROR", "boom");

        let err = gateway.create_order(order_request("S1")).await.unwrap_err();
        assert!(matches!(err, DomainError::GatewayError { status: 500, .. }));
        assert!(gateway.create_order(order_request("S1")).await.is_ok());
        assert_eq!(gateway.calls(MockOperation::CreateOrder), 2);
    }

    #[tokio::test]
    async fn test_auto_pay_on_query() {
        let gateway = MockGatewayAdapter::new("key").with_auto_pay(Duration::ZERO);
        gateway.create_order(order_request("S1")).await.unwrap();

        let trade = gateway
            .query_order(&OrderRef::OutTradeNo("S1".to_string()))
            .await
            .unwrap();
        assert_eq!(trade.trade_state, TradeState::Success);

        let by_id = gateway
            .query_order(&OrderRef::TransactionId(trade.transaction_id.unwrap()))
            .await
            .unwrap();
        assert_eq!(by_id.out_trade_no, "S1");
    }

    #[tokio::test]
    async fn test_tampered_notification_is_rejected() {
        let gateway = MockGatewayAdapter::new("key");
        let mut raw = gateway.signed_notification(json!({
            "id": "EV-1",
            "event_type": "TRANSACTION.SUCCESS",
            "resource": {"out_trade_no": "S1", "transaction_id": "42", "trade_state": "SUCCESS"}
        }));
        assert!(gateway.verify_and_decode(&raw).await.is_ok());

        raw.body = raw.body.iter().rev().copied().collect();
        let err = gateway.verify_and_decode(&raw).await.unwrap_err();
        assert!(matches!(err, DomainError::VerificationError(_)));
    }

    #[tokio::test]
    async fn test_signature_is_keyed_hmac() {
        let gateway = MockGatewayAdapter::new("secret");
        let signature = gateway.sign("1", "n", b"body").unwrap();

        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(b"1\nn\nbody\n");
        assert_eq!(signature, hex::encode(mac.finalize().into_bytes()));

        // 另一把密钥签出的通知不能通过校验
        let other = MockGatewayAdapter::new("other-key");
        let raw = other.signed_notification(json!({
            "id": "EV-1",
            "event_type": "TRANSACTION.SUCCESS",
            "resource": {"out_trade_no": "S1", "transaction_id": "42", "trade_state": "SUCCESS"}
        }));
        let err = gateway.verify_and_decode(&raw).await.unwrap_err();
        assert!(matches!(err, DomainError::VerificationError(_)));
    }
}
