pub mod app_config;
pub mod wechat_config;

pub use app_config::{AppConfig, GatewayMode};
pub use wechat_config::WeChatPayConfig;
