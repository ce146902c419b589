use super::handlers::*;
use crate::ports::{NotificationLedgerPort, OrderStorePort, PaymentGatewayPort};
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router<G, S, L>(state: AppState<G, S, L>) -> Router
where
    G: PaymentGatewayPort + 'static,
    S: OrderStorePort + 'static,
    L: NotificationLedgerPort + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .route("/api/orders", post(create_order::<G, S, L>))
        .route("/api/orders/:out_trade_no", get(query_order::<G, S, L>))
        .route(
            "/api/orders/transactions/:transaction_id",
            get(query_order_by_transaction::<G, S, L>),
        )
        .route("/api/orders/:out_trade_no/close", post(close_order::<G, S, L>))
        .route("/api/refunds", post(create_refund::<G, S, L>))
        .route("/api/refunds/:out_refund_no", get(query_refund::<G, S, L>))
        .route("/api/notify", post(notify::<G, S, L>))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
