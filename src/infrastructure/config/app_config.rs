use crate::domain::errors::{DomainError, DomainResult};
use crate::infrastructure::config::wechat_config::WeChatPayConfig;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// 网关模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    /// 真实微信支付 v3 接口
    WeChat,
    /// 进程内模拟网关
    Mock,
}

/// 服务配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,

    /// 未配置时使用内存存储
    pub database_url: Option<String>,

    pub gateway_mode: GatewayMode,

    /// 订单默认有效期
    pub order_ttl: Duration,

    /// 调用网关的默认截止时间
    pub request_timeout: Duration,

    pub default_currency: String,

    /// 支付结果通知地址
    pub notify_url: String,

    /// 已处理通知ID缓存容量
    pub dedup_capacity: usize,

    /// 过期订单扫描间隔
    pub expiry_sweep_interval: Duration,

    pub mock_signing_key: String,
    pub mock_auto_pay: Option<Duration>,

    pub wechat: Option<Arc<WeChatPayConfig>>,
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> DomainResult<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            DomainError::ConfigurationError(format!("{} has an invalid value: {}", key, raw))
        }),
    }
}

impl AppConfig {
    pub fn from_env() -> DomainResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> DomainResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let gateway_mode = match lookup("GATEWAY_MODE").as_deref() {
            None | Some("") | Some("mock") => GatewayMode::Mock,
            Some("wechat") => GatewayMode::WeChat,
            Some(other) => {
                return Err(DomainError::ConfigurationError(format!(
                    "GATEWAY_MODE must be wechat or mock, got {}",
                    other
                )));
            }
        };

        let wechat = match gateway_mode {
            GatewayMode::WeChat => Some(WeChatPayConfig::from_lookup(&lookup)?),
            GatewayMode::Mock => None,
        };

        let server_port = parse_or(&lookup, "SERVER_PORT", 3000u16)?;
        let notify_url = lookup("NOTIFY_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("http://localhost:{}/api/notify", server_port));

        let dedup_capacity = parse_or(&lookup, "DEDUP_CAPACITY", 4096usize)?;
        if dedup_capacity == 0 {
            return Err(DomainError::ConfigurationError(
                "DEDUP_CAPACITY must be positive".to_string(),
            ));
        }

        let expiry_sweep_interval =
            Duration::from_secs(parse_or(&lookup, "EXPIRY_SWEEP_SECS", 30u64)?);
        if expiry_sweep_interval.is_zero() {
            return Err(DomainError::ConfigurationError(
                "EXPIRY_SWEEP_SECS must be positive".to_string(),
            ));
        }

        Ok(Self {
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port,
            database_url: lookup("DATABASE_URL").filter(|v| !v.is_empty()),
            gateway_mode,
            order_ttl: Duration::from_secs(parse_or(&lookup, "ORDER_TTL_SECS", 600u64)?),
            request_timeout: Duration::from_secs(parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 10u64)?),
            default_currency: lookup("DEFAULT_CURRENCY").unwrap_or_else(|| "CNY".to_string()),
            notify_url,
            dedup_capacity,
            expiry_sweep_interval,
            mock_signing_key: lookup("MOCK_SIGNING_KEY")
                .unwrap_or_else(|| "mock-signing-key".to_string()),
            mock_auto_pay: lookup("MOCK_AUTO_PAY_SECS")
                .map(|raw| {
                    raw.parse().map(Duration::from_secs).map_err(|_| {
                        DomainError::ConfigurationError(format!(
                            "MOCK_AUTO_PAY_SECS has an invalid value: {}",
                            raw
                        ))
                    })
                })
                .transpose()?,
            wechat,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            database_url: None,
            gateway_mode: GatewayMode::Mock,
            order_ttl: Duration::from_secs(600),
            request_timeout: Duration::from_secs(10),
            default_currency: "CNY".to_string(),
            notify_url: "http://localhost:3000/api/notify".to_string(),
            dedup_capacity: 4096,
            expiry_sweep_interval: Duration::from_secs(30),
            mock_signing_key: "mock-signing-key".to_string(),
            mock_auto_pay: None,
            wechat: None,
        }
    }
}
