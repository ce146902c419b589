use crate::application::dto::NotificationAnswer;
use crate::application::order_controller::OrderController;
use crate::domain::errors::DomainResult;
use crate::domain::value_objects::SignalSource;
use crate::ports::payment_gateway_port::{NotificationEvent, RawNotification};
use crate::ports::{NotificationLedgerPort, OrderStorePort, PaymentGatewayPort};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 回调通知对账器
///
/// 验签解密后按通知ID去重，再交给控制器处理。只有处理成功（或幂等重复）
/// 才记录通知ID，其余情况应答 FAIL，由网关重发。
pub struct NotificationReconciler<G: PaymentGatewayPort, S: OrderStorePort, L: NotificationLedgerPort> {
    gateway: Arc<G>,
    controller: Arc<OrderController<G, S>>,
    ledger: Arc<L>,
}

impl<G, S, L> NotificationReconciler<G, S, L>
where
    G: PaymentGatewayPort,
    S: OrderStorePort,
    L: NotificationLedgerPort,
{
    pub fn new(gateway: Arc<G>, controller: Arc<OrderController<G, S>>, ledger: Arc<L>) -> Self {
        Self {
            gateway,
            controller,
            ledger,
        }
    }

    /// 处理一次回调，任何错误都转成应答
    pub async fn handle(&self, raw: RawNotification) -> NotificationAnswer {
        let decoded = match self.gateway.verify_and_decode(&raw).await {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(serial = %raw.serial, error = %e, "Notification rejected");
                return NotificationAnswer::fail(e.to_string());
            }
        };
        let resource_id = decoded.resource_id;

        match self.ledger.contains(&resource_id).await {
            Ok(true) => {
                debug!(resource_id = %resource_id, "Notification already processed");
                return NotificationAnswer::success();
            }
            Ok(false) => {}
            Err(e) => {
                error!(resource_id = %resource_id, error = %e, "Notification ledger unavailable");
                return NotificationAnswer::fail(e.to_string());
            }
        }

        if let Err(e) = self.dispatch(decoded.event).await {
            warn!(resource_id = %resource_id, error = %e, "Notification not applied");
            return NotificationAnswer::fail(e.to_string());
        }

        if let Err(e) = self.ledger.record(&resource_id).await {
            // 状态已落库，重发时会得到幂等结果
            warn!(resource_id = %resource_id, error = %e, "Failed to record notification id");
        }
        NotificationAnswer::success()
    }

    async fn dispatch(&self, event: NotificationEvent) -> DomainResult<()> {
        match event {
            NotificationEvent::TransactionSuccess {
                out_trade_no,
                transaction_id,
            } => {
                let outcome = self
                    .controller
                    .apply_payment_signal(&out_trade_no, &transaction_id, SignalSource::Notification)
                    .await?;
                debug!(
                    out_trade_no = %out_trade_no,
                    status = %outcome.order().status,
                    "Payment notification applied"
                );
            }
            NotificationEvent::RefundResult {
                out_refund_no,
                refund_id,
                status,
            } => {
                self.controller
                    .apply_refund_result(&out_refund_no, refund_id, status)
                    .await?;
            }
            NotificationEvent::TransactionOther { event_type } => {
                info!(event_type = %event_type, "Notification acknowledged without action");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::deadline::Deadline;
    use crate::application::dto::{CreateOrderRequest, RefundRequest};
    use crate::application::order_controller::OrderSettings;
    use crate::domain::events::OrderEvent;
    use crate::domain::value_objects::{OrderStatus, RefundStatus};
    use crate::infrastructure::adapters::{
        InMemoryOrderStore, MockGatewayAdapter, RecentNotificationLedger,
    };
    use serde_json::json;
    use std::time::Duration;

    type Controller = OrderController<MockGatewayAdapter, InMemoryOrderStore>;
    type Reconciler = NotificationReconciler<MockGatewayAdapter, InMemoryOrderStore, RecentNotificationLedger>;

    struct Fixture {
        gateway: Arc<MockGatewayAdapter>,
        controller: Arc<Controller>,
        ledger: Arc<RecentNotificationLedger>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(MockGatewayAdapter::new("notify-key"));
        let controller = Arc::new(Controller::new(
            gateway.clone(),
            Arc::new(InMemoryOrderStore::new()),
            OrderSettings {
                default_currency: "CNY".to_string(),
                order_ttl: Duration::from_secs(600),
                notify_url: "https://example.com/api/notify".to_string(),
            },
        ));
        let ledger = Arc::new(RecentNotificationLedger::new(16));
        let reconciler = Reconciler::new(gateway.clone(), controller.clone(), ledger.clone());
        Fixture {
            gateway,
            controller,
            ledger,
            reconciler,
        }
    }

    async fn create(controller: &Controller, out_trade_no: &str) {
        controller
            .create_order(
                CreateOrderRequest {
                    out_trade_no: Some(out_trade_no.to_string()),
                    amount_minor_units: 1000,
                    currency: None,
                    description: "for testing".to_string(),
                    time_expire: None,
                    attach: None,
                    notify_url: None,
                },
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap();
    }

    fn payment_notification(
        gateway: &MockGatewayAdapter,
        id: &str,
        out_trade_no: &str,
        transaction_id: &str,
    ) -> RawNotification {
        gateway.signed_notification(json!({
            "id": id,
            "create_time": "2015-05-20T13:29:35+08:00",
            "resource_type": "encrypt-resource",
            "event_type": "TRANSACTION.SUCCESS",
            "summary": "支付成功",
            "resource": {
                "out_trade_no": out_trade_no,
                "transaction_id": transaction_id,
                "trade_state": "SUCCESS"
            }
        }))
    }

    #[tokio::test]
    async fn test_payment_notification_marks_paid() {
        let f = fixture();
        create(&f.controller, "S1").await;

        let answer = f
            .reconciler
            .handle(payment_notification(&f.gateway, "EV-1", "S1", "TX1"))
            .await;

        assert!(answer.is_success());
        let view = f.controller.get_order("S1").await.unwrap();
        assert_eq!(view.status, OrderStatus::Paid);
        assert_eq!(view.paid_via, Some(SignalSource::Notification));
        assert!(f.ledger.contains("EV-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_redelivery_is_acknowledged_once() {
        let f = fixture();
        create(&f.controller, "S1").await;
        let mut events = f.controller.subscribe();

        let raw = payment_notification(&f.gateway, "EV-1", "S1", "TX1");
        assert!(f.reconciler.handle(raw.clone()).await.is_success());
        assert!(f.reconciler.handle(raw).await.is_success());
        // 新的通知ID但交易号相同：幂等成功
        assert!(f
            .reconciler
            .handle(payment_notification(&f.gateway, "EV-2", "S1", "TX1"))
            .await
            .is_success());

        let mut paid = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, OrderEvent::Paid(_)) {
                paid += 1;
            }
        }
        assert_eq!(paid, 1);
        assert_eq!(f.controller.get_order("S1").await.unwrap().history.len(), 2);
    }

    #[tokio::test]
    async fn test_tampered_notification_fails_without_state_change() {
        let f = fixture();
        create(&f.controller, "S1").await;

        let mut raw = payment_notification(&f.gateway, "EV-1", "S1", "TX1");
        raw.signature = "0".repeat(64);

        let answer = f.reconciler.handle(raw).await;
        assert_eq!(answer.code, NotificationAnswer::FAIL);
        assert_eq!(
            f.controller.get_order("S1").await.unwrap().status,
            OrderStatus::Created
        );
        assert!(!f.ledger.contains("EV-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_order_is_retried() {
        let f = fixture();

        let answer = f
            .reconciler
            .handle(payment_notification(&f.gateway, "EV-1", "NOPE", "TX1"))
            .await;
        assert!(!answer.is_success());
        assert!(!f.ledger.contains("EV-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_conflict_and_late_signal_answer_fail() {
        let f = fixture();
        create(&f.controller, "S1").await;
        create(&f.controller, "S2").await;
        f.reconciler
            .handle(payment_notification(&f.gateway, "EV-1", "S1", "TX1"))
            .await;
        f.controller
            .close_order("S2", Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap();

        let conflict = f
            .reconciler
            .handle(payment_notification(&f.gateway, "EV-2", "S1", "TX2"))
            .await;
        let late = f
            .reconciler
            .handle(payment_notification(&f.gateway, "EV-3", "S2", "TX3"))
            .await;

        assert!(!conflict.is_success());
        assert!(!late.is_success());
        assert!(!f.ledger.contains("EV-2").await.unwrap());
        assert!(!f.ledger.contains("EV-3").await.unwrap());
        assert_eq!(
            f.controller.get_order("S2").await.unwrap().status,
            OrderStatus::Closed
        );
    }

    #[tokio::test]
    async fn test_refund_notification_settles_record() {
        let f = fixture();
        create(&f.controller, "S1").await;
        f.gateway.pay("S1");
        f.controller
            .query_order_status(
                crate::domain::OrderRef::OutTradeNo("S1".to_string()),
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        f.gateway.set_refund_outcome(RefundStatus::Requested);
        f.controller
            .request_refund(
                RefundRequest {
                    out_trade_no: "S1".to_string(),
                    out_refund_no: Some("R1".to_string()),
                    refund_amount_minor_units: 300,
                    reason: Some("商品已售完".to_string()),
                },
                Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        let raw = f.gateway.signed_notification(json!({
            "id": "EV-R1",
            "event_type": "REFUND.SUCCESS",
            "resource": {
                "out_trade_no": "S1",
                "out_refund_no": "R1",
                "refund_id": "50000000382019052709732678859",
                "refund_status": "SUCCESS"
            }
        }));
        assert!(f.reconciler.handle(raw).await.is_success());

        let view = f.controller.get_order("S1").await.unwrap();
        assert_eq!(view.refunds[0].status, RefundStatus::Succeeded);
        assert_eq!(view.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_other_events_are_acknowledged() {
        let f = fixture();
        let raw = f.gateway.signed_notification(json!({
            "id": "EV-9",
            "event_type": "TRANSACTION.CLOSED",
            "resource": {"out_trade_no": "S1", "trade_state": "CLOSED"}
        }));

        assert!(f.reconciler.handle(raw).await.is_success());
        assert!(f.ledger.contains("EV-9").await.unwrap());
    }
}
