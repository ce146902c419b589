mod api;
mod application;
mod domain;
mod infrastructure;
mod ports;

use api::AppState;
use application::{NotificationReconciler, OrderController, OrderSettings};
use chrono::Utc;
use domain::events::{DomainEvent, OrderEvent};
use infrastructure::{
    AppConfig, GatewayMode, InMemoryOrderStore, MockGatewayAdapter, MySqlOrderStore,
    RecentNotificationLedger, WeChatPayAdapter,
};
use ports::{OrderStorePort, PaymentGatewayPort};
use sqlx::MySqlPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenvy::dotenv().ok();

    // 初始化日志，RUST_LOG 未设置时为 info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Starting order service...");
    let config = AppConfig::from_env()?;

    match config.database_url.clone() {
        Some(database_url) => {
            info!("Connecting to database...");
            let pool = MySqlPool::connect(&database_url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database connected and migrated");

            let store = Arc::new(MySqlOrderStore::new(Arc::new(pool)));
            with_gateway(config, store).await
        }
        None => {
            warn!("DATABASE_URL not set, orders are kept in memory");
            with_gateway(config, Arc::new(InMemoryOrderStore::new())).await
        }
    }
}

async fn with_gateway<S>(config: AppConfig, store: Arc<S>) -> anyhow::Result<()>
where
    S: OrderStorePort + 'static,
{
    match (config.gateway_mode, config.wechat.clone()) {
        (GatewayMode::WeChat, Some(wechat)) => {
            info!("WeChat Pay configuration loaded for mchid: {}", wechat.mchid);
            let gateway = Arc::new(WeChatPayAdapter::new(wechat)?);
            serve(config, gateway, store).await
        }
        (GatewayMode::WeChat, None) => {
            anyhow::bail!("GATEWAY_MODE=wechat requires the WECHAT_* settings")
        }
        (GatewayMode::Mock, _) => {
            warn!("Using the in-process mock payment gateway");
            let mut gateway = MockGatewayAdapter::new(config.mock_signing_key.clone());
            if let Some(after) = config.mock_auto_pay {
                gateway = gateway.with_auto_pay(after);
            }
            serve(config, Arc::new(gateway), store).await
        }
    }
}

async fn serve<G, S>(config: AppConfig, gateway: Arc<G>, store: Arc<S>) -> anyhow::Result<()>
where
    G: PaymentGatewayPort + 'static,
    S: OrderStorePort + 'static,
{
    let controller = Arc::new(OrderController::new(
        gateway.clone(),
        store,
        OrderSettings {
            default_currency: config.default_currency.clone(),
            order_ttl: config.order_ttl,
            notify_url: config.notify_url.clone(),
        },
    ));
    let reconciler = Arc::new(NotificationReconciler::new(
        gateway,
        controller.clone(),
        Arc::new(RecentNotificationLedger::new(config.dedup_capacity)),
    ));

    spawn_event_log(controller.subscribe());
    spawn_expiry_sweeper(
        controller.clone(),
        config.expiry_sweep_interval,
        config.request_timeout,
    );

    let app = api::create_router(AppState {
        controller,
        reconciler,
        request_timeout: config.request_timeout,
    });

    let addr = config.listen_addr();
    info!("Server listening on {}", addr);
    info!("Available endpoints:");
    info!("  GET  /health - Health check");
    info!("  POST /api/orders - Create order");
    info!("  GET  /api/orders/:out_trade_no - Query order");
    info!("  GET  /api/orders/transactions/:transaction_id - Query order by transaction id");
    info!("  POST /api/orders/:out_trade_no/close - Close order");
    info!("  POST /api/refunds - Request refund");
    info!("  GET  /api/refunds/:out_refund_no - Query refund");
    info!("  POST /api/notify - WeChat Pay notification");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// 订单事件写入日志，异常事件按 error 级别输出
fn spawn_event_log(mut events: tokio::sync::broadcast::Receiver<OrderEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let payload = serde_json::to_string(&event).unwrap_or_default();
                    if matches!(event, OrderEvent::Anomaly(_)) {
                        error!(
                            event_type = event.event_type(),
                            occurred_at = %event.occurred_at(),
                            payload = %payload,
                            "Order event"
                        );
                    } else {
                        info!(
                            event_type = event.event_type(),
                            occurred_at = %event.occurred_at(),
                            payload = %payload,
                            "Order event"
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Order event log lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// 定时把超过失效时间的订单置为过期
fn spawn_expiry_sweeper<G, S>(
    controller: Arc<OrderController<G, S>>,
    every: Duration,
    per_order_timeout: Duration,
) where
    G: PaymentGatewayPort + 'static,
    S: OrderStorePort + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = controller.expire_overdue(Utc::now(), per_order_timeout).await {
                warn!(error = %e, "Expiry sweep failed");
            }
        }
    });
}
