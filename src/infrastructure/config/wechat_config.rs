use crate::domain::errors::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 微信支付配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeChatPayConfig {
    /// 商户号
    pub mchid: String,

    /// 商户API证书序列号
    pub serial_no: String,

    /// 商户API私钥内容（PKCS#8 PEM）
    pub private_key: String,

    /// 商户API v3密钥（用于回调通知解密）
    pub api_v3_key: String,

    /// 微信支付平台公钥（PEM，用于回调验签）
    pub platform_public_key: String,

    /// APPID
    pub appid: String,

    /// API基础URL
    pub base_url: String,
}

pub(crate) fn required<F>(lookup: &F, key: &str) -> DomainResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| DomainError::ConfigurationError(format!("{} must be set", key)))
}

impl WeChatPayConfig {
    pub fn from_lookup<F>(lookup: F) -> DomainResult<Arc<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        // 私钥可以直接给出，也可以给出文件路径
        let private_key = match lookup("WECHAT_PRIVATE_KEY").filter(|v| !v.is_empty()) {
            Some(pem) => pem,
            None => {
                let path = required(&lookup, "WECHAT_PRIVATE_KEY_PATH")?;
                std::fs::read_to_string(&path).map_err(|e| {
                    DomainError::ConfigurationError(format!("Failed to read {}: {}", path, e))
                })?
            }
        };

        let api_v3_key = required(&lookup, "WECHAT_API_V3_KEY")?;
        if api_v3_key.len() != 32 {
            return Err(DomainError::ConfigurationError(
                "WECHAT_API_V3_KEY must be 32 bytes".to_string(),
            ));
        }

        Ok(Arc::new(Self {
            mchid: required(&lookup, "WECHAT_MCHID")?,
            serial_no: required(&lookup, "WECHAT_SERIAL_NO")?,
            private_key,
            api_v3_key,
            platform_public_key: required(&lookup, "WECHAT_PLATFORM_PUBLIC_KEY")?,
            appid: required(&lookup, "WECHAT_APPID")?,
            base_url: lookup("WECHAT_BASE_URL")
                .unwrap_or_else(|| "https://api.mch.weixin.qq.com".to_string()),
        }))
    }
}
