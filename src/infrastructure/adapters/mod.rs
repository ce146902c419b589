pub mod memory_notification_ledger;
pub mod memory_order_store;
pub mod mock_gateway_adapter;
pub mod mysql_order_store;
pub mod notification_payload;
pub mod wechat_pay_adapter;

pub use memory_notification_ledger::RecentNotificationLedger;
pub use memory_order_store::InMemoryOrderStore;
pub use mock_gateway_adapter::MockGatewayAdapter;
pub use mysql_order_store::MySqlOrderStore;
pub use wechat_pay_adapter::WeChatPayAdapter;
