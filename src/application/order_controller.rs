use crate::application::deadline::Deadline;
use crate::application::dto::{CreateOrderRequest, CreateOrderResponse, OrderView, RefundRequest};
use crate::application::keyed_lock::{KeyGuard, KeyedLocks};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::events::*;
use crate::domain::value_objects::{Money, OrderRef, OrderStatus, RefundStatus, SignalSource};
use crate::domain::{NewOrder, Order, RefundRecord, TradeNoGenerator};
use crate::ports::payment_gateway_port::{
    GatewayOrderRequest, GatewayRefundRequest, GatewayTransaction, TradeState,
};
use crate::ports::{InsertResult, OrderStorePort, PaymentGatewayPort};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 256;

/// 4xx 中只有请求超时和限流是可重试的，其余视为业务拒绝
fn is_definitive_rejection(err: &DomainError) -> bool {
    match err {
        DomainError::GatewayError { status, .. } => {
            (400..500).contains(status) && !matches!(*status, 408 | 429)
        }
        _ => false,
    }
}

/// 下单时使用的默认值
#[derive(Debug, Clone)]
pub struct OrderSettings {
    pub default_currency: String,
    pub order_ttl: Duration,
    pub notify_url: String,
}

/// 支付信号的处理结果
#[derive(Debug, Clone)]
pub enum SignalOutcome {
    /// 本次信号把订单推进到已支付
    Applied(Order),
    /// 订单早已以同一交易号支付，未做修改
    Duplicate(Order),
}

impl SignalOutcome {
    pub fn order(&self) -> &Order {
        match self {
            SignalOutcome::Applied(order) | SignalOutcome::Duplicate(order) => order,
        }
    }
}

/// 订单生命周期控制器
///
/// 所有订单与退款单的修改都经过这里。同一商户订单号的读改写在 `KeyedLocks`
/// 下串行执行，回调和主动查询谁先拿到锁谁生效，另一方得到幂等结果。
pub struct OrderController<G: PaymentGatewayPort, S: OrderStorePort> {
    gateway: Arc<G>,
    store: Arc<S>,
    settings: OrderSettings,
    locks: KeyedLocks,
    trade_nos: TradeNoGenerator,
    events: broadcast::Sender<OrderEvent>,
}

impl<G: PaymentGatewayPort, S: OrderStorePort> OrderController<G, S> {
    pub fn new(gateway: Arc<G>, store: Arc<S>, settings: OrderSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            gateway,
            store,
            settings,
            locks: KeyedLocks::new(),
            trade_nos: TradeNoGenerator::new(),
            events,
        }
    }

    /// 订阅订单事件
    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: OrderEvent) {
        debug!(event_type = event.event_type(), "Order event");
        // 没有订阅者时发送失败，忽略即可
        let _ = self.events.send(event);
    }

    async fn lock_within(
        &self,
        key: &str,
        deadline: Deadline,
        operation: &str,
    ) -> DomainResult<KeyGuard<'_>> {
        deadline
            .run(operation, async { Ok::<_, DomainError>(self.locks.lock(key).await) })
            .await
    }

    async fn load_order(&self, out_trade_no: &str) -> DomainResult<Order> {
        self.store
            .find_order(out_trade_no)
            .await?
            .ok_or_else(|| DomainError::OrderNotFound(out_trade_no.to_string()))
    }

    async fn load_refund(&self, out_refund_no: &str) -> DomainResult<RefundRecord> {
        self.store
            .find_refund(out_refund_no)
            .await?
            .ok_or_else(|| DomainError::RefundNotFound(out_refund_no.to_string()))
    }

    /// 创建订单：先在网关下单，成功后才落库
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        deadline: Deadline,
    ) -> DomainResult<CreateOrderResponse> {
        deadline.check("creating order")?;

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.settings.order_ttl)
            .map_err(|e| DomainError::ConfigurationError(format!("Invalid order ttl: {}", e)))?;

        let new_order = NewOrder {
            out_trade_no: request
                .out_trade_no
                .filter(|no| !no.is_empty())
                .unwrap_or_else(|| self.trade_nos.next()),
            amount: Money::from_minor_units(
                request.amount_minor_units,
                request
                    .currency
                    .unwrap_or_else(|| self.settings.default_currency.clone()),
            ),
            description: request.description,
            time_expire: request.time_expire.unwrap_or(now + ttl),
            attach: request.attach,
            notify_url: request
                .notify_url
                .unwrap_or_else(|| self.settings.notify_url.clone()),
        };
        new_order.validate(now)?;

        info!(out_trade_no = %new_order.out_trade_no, amount = %new_order.amount, "Creating order");

        let _guard = self
            .lock_within(&new_order.out_trade_no, deadline, "creating order")
            .await?;

        if self.store.find_order(&new_order.out_trade_no).await?.is_some() {
            return Err(DomainError::ValidationError(format!(
                "out_trade_no {} already used",
                new_order.out_trade_no
            )));
        }

        let gateway_request = GatewayOrderRequest {
            out_trade_no: new_order.out_trade_no.clone(),
            description: new_order.description.clone(),
            amount_minor_units: new_order.amount.to_minor_units(),
            currency: new_order.amount.currency.clone(),
            time_expire: new_order.time_expire,
            attach: new_order.attach.clone(),
            notify_url: new_order.notify_url.clone(),
        };
        let gateway_order = deadline
            .run("creating order", self.gateway.create_order(gateway_request))
            .await?;

        let order = Order::new(new_order, gateway_order.payment_target, now)?;
        if self.store.insert_order(&order).await? == InsertResult::AlreadyExists {
            return Err(DomainError::ValidationError(format!(
                "out_trade_no {} already used",
                order.out_trade_no
            )));
        }

        self.emit(OrderEvent::Created(PaymentOrderCreated::from_order(&order)));
        Ok(CreateOrderResponse::from(&order))
    }

    /// 对账核心：把一次支付信号合并进订单状态
    pub async fn apply_payment_signal(
        &self,
        out_trade_no: &str,
        transaction_id: &str,
        source: SignalSource,
    ) -> DomainResult<SignalOutcome> {
        if transaction_id.is_empty() {
            return Err(DomainError::ValidationError(
                "Transaction id must not be empty".to_string(),
            ));
        }

        let _guard = self.locks.lock(out_trade_no).await;
        let mut order = self.load_order(out_trade_no).await?;

        match order.status {
            OrderStatus::Created => {
                order.mark_as_paid(transaction_id.to_string(), source, Utc::now())?;
                self.store.update_order(&mut order).await?;

                info!(
                    out_trade_no = %out_trade_no,
                    transaction_id = %transaction_id,
                    source = %source,
                    "Order paid"
                );
                self.emit(OrderEvent::Paid(PaymentSucceeded::new(&order, transaction_id, source)));
                Ok(SignalOutcome::Applied(order))
            }
            OrderStatus::NotifiedPaid | OrderStatus::QueriedPaid | OrderStatus::Paid => {
                let recorded = order.transaction_id.clone().unwrap_or_default();
                if recorded == transaction_id {
                    debug!(out_trade_no = %out_trade_no, source = %source, "Duplicate payment signal");
                    return Ok(SignalOutcome::Duplicate(order));
                }

                error!(
                    out_trade_no = %out_trade_no,
                    recorded = %recorded,
                    received = %transaction_id,
                    source = %source,
                    "Conflicting transaction id"
                );
                self.emit(OrderEvent::Anomaly(PaymentAnomaly::new(
                    out_trade_no,
                    transaction_id,
                    source,
                    format!("order already paid by transaction {}", recorded),
                )));
                Err(DomainError::Conflict {
                    out_trade_no: out_trade_no.to_string(),
                    recorded,
                    received: transaction_id.to_string(),
                })
            }
            OrderStatus::Closed | OrderStatus::Expired => {
                warn!(
                    out_trade_no = %out_trade_no,
                    status = %order.status,
                    transaction_id = %transaction_id,
                    source = %source,
                    "Payment signal after order was terminated"
                );
                self.emit(OrderEvent::Anomaly(PaymentAnomaly::new(
                    out_trade_no,
                    transaction_id,
                    source,
                    format!("payment received while order is {}", order.status),
                )));
                Err(DomainError::LateSignal {
                    out_trade_no: out_trade_no.to_string(),
                    status: order.status.to_string(),
                    transaction_id: transaction_id.to_string(),
                })
            }
        }
    }

    /// 关闭订单，只允许从 CREATED 关闭
    pub async fn close_order(&self, out_trade_no: &str, deadline: Deadline) -> DomainResult<Order> {
        deadline.check("closing order")?;
        let _guard = self.lock_within(out_trade_no, deadline, "closing order").await?;

        let mut order = self.load_order(out_trade_no).await?;
        if order.status != OrderStatus::Created {
            return Err(DomainError::InvalidState {
                expected: OrderStatus::Created.to_string(),
                actual: order.status.to_string(),
            });
        }

        deadline
            .run("closing order", self.gateway.close_order(out_trade_no))
            .await?;

        order.mark_as_closed(Utc::now())?;
        self.store.update_order(&mut order).await?;
        info!(out_trade_no = %out_trade_no, "Order closed");
        self.emit(OrderEvent::Terminated(OrderTerminated::from_order(&order, false)));
        Ok(order)
    }

    /// 申请退款
    pub async fn request_refund(
        &self,
        request: RefundRequest,
        deadline: Deadline,
    ) -> DomainResult<RefundRecord> {
        deadline.check("requesting refund")?;
        let _guard = self
            .lock_within(&request.out_trade_no, deadline, "requesting refund")
            .await?;

        let order = self.load_order(&request.out_trade_no).await?;
        let out_refund_no = request
            .out_refund_no
            .filter(|no| !no.is_empty())
            .unwrap_or_else(|| self.trade_nos.next());

        if let Some(existing) = self.store.find_refund(&out_refund_no).await? {
            if existing.out_trade_no != order.out_trade_no
                || existing.refund_amount_minor_units != request.refund_amount_minor_units
            {
                return Err(DomainError::ValidationError(format!(
                    "out_refund_no {} already used for a different refund",
                    out_refund_no
                )));
            }
            if existing.status != RefundStatus::Requested {
                debug!(out_refund_no = %out_refund_no, "Refund replay returns stored record");
                return Ok(existing);
            }
            // 仍在处理中：网关按退款单号幂等，重新提交即可拿到结果
            return self.submit_refund(&order, existing, deadline).await;
        }

        if order.status != OrderStatus::Paid {
            return Err(DomainError::InvalidState {
                expected: OrderStatus::Paid.to_string(),
                actual: order.status.to_string(),
            });
        }

        let record = RefundRecord::new(
            out_refund_no,
            order.out_trade_no.clone(),
            request.refund_amount_minor_units,
            request.reason,
            Utc::now(),
        )?;

        let held: i64 = self
            .store
            .list_refunds(&order.out_trade_no)
            .await?
            .iter()
            .filter(|r| r.holds_amount())
            .map(|r| r.refund_amount_minor_units)
            .sum();
        let refundable = order.amount.to_minor_units() - held;
        if record.refund_amount_minor_units > refundable {
            return Err(DomainError::AmountExceeded {
                requested: record.refund_amount_minor_units,
                refundable,
            });
        }

        if self.store.insert_refund(&record).await? == InsertResult::AlreadyExists {
            return Err(DomainError::ValidationError(format!(
                "out_refund_no {} already used",
                record.out_refund_no
            )));
        }
        info!(
            out_trade_no = %record.out_trade_no,
            out_refund_no = %record.out_refund_no,
            amount = record.refund_amount_minor_units,
            "Refund requested"
        );

        self.submit_refund(&order, record, deadline).await
    }

    async fn submit_refund(
        &self,
        order: &Order,
        mut record: RefundRecord,
        deadline: Deadline,
    ) -> DomainResult<RefundRecord> {
        let gateway_request = GatewayRefundRequest {
            out_trade_no: order.out_trade_no.clone(),
            transaction_id: order.transaction_id.clone(),
            out_refund_no: record.out_refund_no.clone(),
            reason: record.reason.clone(),
            notify_url: self.settings.notify_url.clone(),
            refund_minor_units: record.refund_amount_minor_units,
            total_minor_units: order.amount.to_minor_units(),
            currency: order.amount.currency.clone(),
        };

        match deadline
            .run("requesting refund", self.gateway.request_refund(gateway_request))
            .await
        {
            Ok(result) => {
                self.settle_refund(&mut record, result.status, result.refund_id)
                    .await?;
                Ok(record)
            }
            // 网关明确拒绝，退款单不会再成功
            Err(err) if is_definitive_rejection(&err) => {
                warn!(out_refund_no = %record.out_refund_no, error = %err, "Refund rejected by gateway");
                self.settle_refund(&mut record, RefundStatus::Failed, None)
                    .await?;
                Err(err)
            }
            Err(err) => {
                warn!(
                    out_refund_no = %record.out_refund_no,
                    error = %err,
                    "Refund outcome unknown, left REQUESTED"
                );
                Err(err)
            }
        }
    }

    async fn settle_refund(
        &self,
        record: &mut RefundRecord,
        outcome: RefundStatus,
        refund_id: Option<String>,
    ) -> DomainResult<()> {
        let was_pending = record.status == RefundStatus::Requested;
        let settled = record.settle(outcome, refund_id, Utc::now())?;
        if was_pending {
            self.store.update_refund(record).await?;
        }
        if settled {
            info!(
                out_refund_no = %record.out_refund_no,
                status = %record.status,
                "Refund settled"
            );
            self.emit(OrderEvent::Refund(RefundSettled::from_record(record)));
        }
        Ok(())
    }

    /// 查询退款单，仍在处理中时向网关确认
    pub async fn query_refund(
        &self,
        out_refund_no: &str,
        deadline: Deadline,
    ) -> DomainResult<RefundRecord> {
        deadline.check("querying refund")?;

        let record = self.load_refund(out_refund_no).await?;
        if record.status != RefundStatus::Requested {
            return Ok(record);
        }

        let _guard = self
            .lock_within(&record.out_trade_no, deadline, "querying refund")
            .await?;
        let mut record = self.load_refund(out_refund_no).await?;
        if record.status != RefundStatus::Requested {
            return Ok(record);
        }

        let result = deadline
            .run("querying refund", self.gateway.query_refund(out_refund_no))
            .await?;
        self.settle_refund(&mut record, result.status, result.refund_id)
            .await?;
        Ok(record)
    }

    /// 应用退款回调中的结果
    pub async fn apply_refund_result(
        &self,
        out_refund_no: &str,
        refund_id: Option<String>,
        outcome: RefundStatus,
    ) -> DomainResult<RefundRecord> {
        let out_trade_no = self.load_refund(out_refund_no).await?.out_trade_no;

        let _guard = self.locks.lock(&out_trade_no).await;
        let mut record = self.load_refund(out_refund_no).await?;
        self.settle_refund(&mut record, outcome, refund_id).await?;
        Ok(record)
    }

    /// 主动向网关查询订单状态并对账，返回本地视图
    pub async fn query_order_status(
        &self,
        order_ref: OrderRef,
        deadline: Deadline,
    ) -> DomainResult<OrderView> {
        deadline.check("querying order")?;

        let local = match &order_ref {
            OrderRef::OutTradeNo(no) => Some(self.load_order(no).await?),
            OrderRef::TransactionId(id) => self.store.find_by_transaction_id(id).await?,
        };

        let transaction = deadline
            .run("querying order", self.gateway.query_order(&order_ref))
            .await?;
        debug!(
            order_ref = %order_ref,
            trade_state = ?transaction.trade_state,
            "Gateway transaction state"
        );

        let out_trade_no = local
            .map(|order| order.out_trade_no)
            .unwrap_or_else(|| transaction.out_trade_no.clone());
        self.reconcile_transaction(&out_trade_no, &transaction, Utc::now())
            .await?;

        self.get_order(&out_trade_no).await
    }

    /// 把网关交易状态合并到本地，返回发生迁移后的新状态
    async fn reconcile_transaction(
        &self,
        out_trade_no: &str,
        transaction: &GatewayTransaction,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<OrderStatus>> {
        if transaction.trade_state.is_paid() {
            let Some(transaction_id) = transaction.transaction_id.as_deref() else {
                warn!(out_trade_no = %out_trade_no, "Paid transaction without transaction id");
                return Ok(None);
            };
            return match self
                .apply_payment_signal(out_trade_no, transaction_id, SignalSource::Query)
                .await?
            {
                SignalOutcome::Applied(order) => Ok(Some(order.status)),
                SignalOutcome::Duplicate(_) => Ok(None),
            };
        }

        match transaction.trade_state {
            TradeState::Closed | TradeState::Revoked => self.terminate(out_trade_no, false, now).await,
            TradeState::UserPaying => Ok(None),
            _ => self.terminate(out_trade_no, true, now).await,
        }
    }

    /// 把仍为 CREATED 的订单关闭（网关已关单）或置为过期（已超过失效时间）
    async fn terminate(
        &self,
        out_trade_no: &str,
        expired: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<OrderStatus>> {
        let _guard = self.locks.lock(out_trade_no).await;
        let mut order = self.load_order(out_trade_no).await?;

        if order.status != OrderStatus::Created {
            return Ok(None);
        }
        if expired {
            if !order.is_overdue(now) {
                return Ok(None);
            }
            order.mark_as_expired(now)?;
        } else {
            order.mark_as_closed(now)?;
        }

        self.store.update_order(&mut order).await?;
        info!(out_trade_no = %out_trade_no, status = %order.status, "Order terminated");
        self.emit(OrderEvent::Terminated(OrderTerminated::from_order(&order, expired)));
        Ok(Some(order.status))
    }

    /// 本地读取订单视图，不访问网关
    pub async fn get_order(&self, out_trade_no: &str) -> DomainResult<OrderView> {
        let order = self.load_order(out_trade_no).await?;
        let refunds = self.store.list_refunds(out_trade_no).await?;
        Ok(OrderView::new(order, refunds))
    }

    /// 处理已超过失效时间的订单，返回置为过期的数量
    ///
    /// 过期前先向网关确认一次：已支付的按查询信号入账，网关不可用的留到下一轮。
    pub async fn expire_overdue(
        &self,
        now: DateTime<Utc>,
        per_order_timeout: Duration,
    ) -> DomainResult<usize> {
        let overdue = self.store.list_overdue(now).await?;
        let mut expired = 0;

        for out_trade_no in overdue {
            let order_ref = OrderRef::OutTradeNo(out_trade_no.clone());
            let outcome = match Deadline::after(per_order_timeout)
                .run("sweeping overdue order", self.gateway.query_order(&order_ref))
                .await
            {
                Ok(transaction) => {
                    self.reconcile_transaction(&out_trade_no, &transaction, now)
                        .await
                }
                // 网关不认识的订单直接过期
                Err(DomainError::GatewayError { status: 404, .. }) => {
                    self.terminate(&out_trade_no, true, now).await
                }
                Err(err) => Err(err),
            };

            match outcome {
                Ok(Some(OrderStatus::Expired)) => expired += 1,
                Ok(_) => {}
                Err(err) => {
                    warn!(out_trade_no = %out_trade_no, error = %err, "Skipping overdue order");
                }
            }
        }

        if expired > 0 {
            info!(expired, "Expired overdue orders");
        }
        Ok(expired)
    }
}
