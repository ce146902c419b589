pub mod adapters;
pub mod config;

pub use adapters::{InMemoryOrderStore, MockGatewayAdapter, MySqlOrderStore, RecentNotificationLedger, WeChatPayAdapter};
pub use config::{AppConfig, GatewayMode, WeChatPayConfig};
