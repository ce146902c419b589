use crate::application::{
    CreateOrderRequest, Deadline, ErrorResponse, NotificationAnswer, NotificationReconciler,
    OrderController, RefundRequest,
};
use crate::domain::errors::DomainError;
use crate::domain::value_objects::OrderRef;
use crate::ports::payment_gateway_port::RawNotification;
use crate::ports::{NotificationLedgerPort, OrderStorePort, PaymentGatewayPort};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// 应用状态
pub struct AppState<G: PaymentGatewayPort, S: OrderStorePort, L: NotificationLedgerPort> {
    pub controller: Arc<OrderController<G, S>>,
    pub reconciler: Arc<NotificationReconciler<G, S, L>>,

    /// 每个请求的截止时间
    pub request_timeout: Duration,
}

impl<G: PaymentGatewayPort, S: OrderStorePort, L: NotificationLedgerPort> Clone
    for AppState<G, S, L>
{
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
            reconciler: self.reconciler.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

impl<G: PaymentGatewayPort, S: OrderStorePort, L: NotificationLedgerPort> AppState<G, S, L> {
    fn deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn status_for(e: &DomainError) -> StatusCode {
    match e {
        DomainError::ValidationError(_) => StatusCode::BAD_REQUEST,
        DomainError::OrderNotFound(_) | DomainError::RefundNotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Conflict { .. }
        | DomainError::LateSignal { .. }
        | DomainError::InvalidState { .. }
        | DomainError::AmountExceeded { .. }
        | DomainError::ConcurrentModification(_) => StatusCode::CONFLICT,
        DomainError::GatewayError { .. } => StatusCode::BAD_GATEWAY,
        DomainError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        DomainError::VerificationError(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(e: DomainError) -> ApiError {
    let status = status_for(&e);
    if status.is_server_error() {
        error!(code = e.code(), "Request failed: {}", e);
    } else {
        warn!(code = e.code(), "Request rejected: {}", e);
    }
    (status, Json(ErrorResponse::new(e.code(), e.to_string())))
}

/// 创建订单
pub async fn create_order<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    G: PaymentGatewayPort,
    S: OrderStorePort,
    L: NotificationLedgerPort,
{
    info!(out_trade_no = ?request.out_trade_no, "Received order creation request");

    state
        .controller
        .create_order(request, state.deadline())
        .await
        .map(|response| (StatusCode::CREATED, Json(response)))
        .map_err(api_error)
}

/// 按商户订单号查询（会向网关确认最新状态）
pub async fn query_order<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    Path(out_trade_no): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    G: PaymentGatewayPort,
    S: OrderStorePort,
    L: NotificationLedgerPort,
{
    state
        .controller
        .query_order_status(OrderRef::OutTradeNo(out_trade_no), state.deadline())
        .await
        .map(Json)
        .map_err(api_error)
}

/// 按微信支付订单号查询
pub async fn query_order_by_transaction<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    G: PaymentGatewayPort,
    S: OrderStorePort,
    L: NotificationLedgerPort,
{
    state
        .controller
        .query_order_status(OrderRef::TransactionId(transaction_id), state.deadline())
        .await
        .map(Json)
        .map_err(api_error)
}

/// 关闭订单
pub async fn close_order<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    Path(out_trade_no): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    G: PaymentGatewayPort,
    S: OrderStorePort,
    L: NotificationLedgerPort,
{
    info!(out_trade_no = %out_trade_no, "Received close request");

    state
        .controller
        .close_order(&out_trade_no, state.deadline())
        .await
        .map_err(api_error)?;
    state
        .controller
        .get_order(&out_trade_no)
        .await
        .map(Json)
        .map_err(api_error)
}

/// 申请退款
pub async fn create_refund<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    Json(request): Json<RefundRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    G: PaymentGatewayPort,
    S: OrderStorePort,
    L: NotificationLedgerPort,
{
    info!(
        out_trade_no = %request.out_trade_no,
        amount = request.refund_amount_minor_units,
        "Received refund request"
    );

    state
        .controller
        .request_refund(request, state.deadline())
        .await
        .map(Json)
        .map_err(api_error)
}

/// 查询退款
pub async fn query_refund<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    Path(out_refund_no): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    G: PaymentGatewayPort,
    S: OrderStorePort,
    L: NotificationLedgerPort,
{
    state
        .controller
        .query_refund(&out_refund_no, state.deadline())
        .await
        .map(Json)
        .map_err(api_error)
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// 微信支付回调，应答 SUCCESS 返回 200，FAIL 返回 500 让网关重发
pub async fn notify<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse
where
    G: PaymentGatewayPort,
    S: OrderStorePort,
    L: NotificationLedgerPort,
{
    let raw = RawNotification {
        body: body.to_vec(),
        timestamp: header(&headers, "Wechatpay-Timestamp"),
        nonce: header(&headers, "Wechatpay-Nonce"),
        signature: header(&headers, "Wechatpay-Signature"),
        serial: header(&headers, "Wechatpay-Serial"),
    };

    let answer: NotificationAnswer = state.reconciler.handle(raw).await;
    let status = if answer.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(answer))
}

/// 健康检查
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}
