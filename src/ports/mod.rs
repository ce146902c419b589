pub mod order_store_port;
pub mod payment_gateway_port;

pub use order_store_port::{InsertResult, NotificationLedgerPort, OrderStorePort};
pub use payment_gateway_port::PaymentGatewayPort;
