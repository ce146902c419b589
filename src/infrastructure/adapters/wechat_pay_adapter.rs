use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::value_objects::OrderRef;
use crate::infrastructure::adapters::notification_payload::{
    EncryptedResource, NotificationEnvelope, decode_event, refund_status_from_wire,
};
use crate::infrastructure::config::wechat_config::WeChatPayConfig;
use crate::ports::payment_gateway_port::*;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::Engine;
use chrono::SecondsFormat;
use rand::RngCore;
use rand::rngs::OsRng;
use reqwest::{Client, Method, StatusCode};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, warn};

const AUTH_SCHEMA: &str = "WECHATPAY2-SHA256-RSA2048";

/// 回调时间戳允许的最大偏差（秒）
const NOTIFICATION_MAX_SKEW_SECS: i64 = 300;

/// 微信支付错误响应
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// 微信支付适配器实现
#[derive(Clone)]
pub struct WeChatPayAdapter {
    config: Arc<WeChatPayConfig>,
    client: Client,
    signing_key: SigningKey<Sha256>,
    verifying_key: VerifyingKey<Sha256>,
}

impl WeChatPayAdapter {
    pub fn new(config: Arc<WeChatPayConfig>) -> DomainResult<Self> {
        let private_key = rsa::RsaPrivateKey::from_pkcs8_pem(&config.private_key)
            .map_err(|e| DomainError::CryptoError(format!("Failed to load private key: {}", e)))?;
        let public_key = rsa::RsaPublicKey::from_public_key_pem(&config.platform_public_key)
            .map_err(|e| DomainError::CryptoError(format!("Failed to load platform public key: {}", e)))?;

        Ok(Self {
            config,
            client: Client::new(),
            signing_key: SigningKey::<Sha256>::new(private_key),
            verifying_key: VerifyingKey::<Sha256>::new(public_key),
        })
    }

    /// 生成随机字符串
    fn generate_nonce_str() -> String {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// 生成Authorization头，url 为不含域名的路径和查询串
    fn build_authorization(&self, method: &Method, url: &str, body: &str) -> String {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let nonce = Self::generate_nonce_str();
        let message = format!("{}\n{}\n{}\n{}\n{}\n", method, url, timestamp, nonce, body);

        let signature = self
            .signing_key
            .sign_with_rng(&mut OsRng, message.as_bytes());
        let signature = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

        format!(
            "{} mchid=\"{}\",nonce_str=\"{}\",timestamp=\"{}\",serial_no=\"{}\",signature=\"{}\"",
            AUTH_SCHEMA, self.config.mchid, nonce, timestamp, self.config.serial_no, signature
        )
    }

    /// 发送请求；204 返回 None，非 2xx 转为 GatewayError
    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> DomainResult<Option<Value>> {
        let url = format!("{}{}", self.config.base_url, path);
        let body_str = body.map(|b| b.to_string()).unwrap_or_default();
        let authorization = self.build_authorization(&method, path, &body_str);
        debug!(%method, path, "WeChat pay request");

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", authorization)
            .header("Accept", "application/json");
        if !body_str.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body_str);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("WeChat pay API error: {} - {}", status, error_text);
            let api_error = serde_json::from_str::<ApiError>(&error_text).unwrap_or(ApiError {
                code: status.canonical_reason().unwrap_or("UNKNOWN").to_string(),
                message: error_text,
            });
            return Err(DomainError::gateway(status.as_u16(), api_error.code, api_error.message));
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }

    async fn send_expecting(&self, method: Method, path: &str, body: Option<Value>) -> DomainResult<Value> {
        self.send(method, path, body).await?.ok_or_else(|| {
            DomainError::gateway(502, "EMPTY_RESPONSE", format!("{} returned no body", path))
        })
    }

    fn verify_signature(&self, raw: &RawNotification) -> DomainResult<()> {
        let timestamp: i64 = raw
            .timestamp
            .parse()
            .map_err(|_| DomainError::VerificationError("Invalid Wechatpay-Timestamp".to_string()))?;
        let skew = (chrono::Utc::now().timestamp() - timestamp).abs();
        if skew > NOTIFICATION_MAX_SKEW_SECS {
            return Err(DomainError::VerificationError(format!(
                "Notification timestamp is {}s away from now",
                skew
            )));
        }

        let signature = base64::engine::general_purpose::STANDARD
            .decode(&raw.signature)
            .map_err(|e| DomainError::VerificationError(format!("Base64 decode error: {}", e)))?;
        let signature = Signature::try_from(signature.as_slice())
            .map_err(|e| DomainError::VerificationError(format!("Malformed signature: {}", e)))?;

        let mut message = format!("{}\n{}\n", raw.timestamp, raw.nonce).into_bytes();
        message.extend_from_slice(&raw.body);
        message.push(b'\n');

        self.verifying_key
            .verify(&message, &signature)
            .map_err(|_| DomainError::VerificationError("Signature mismatch".to_string()))
    }

    fn gateway_refund(resp: &Value) -> DomainResult<GatewayRefund> {
        let out_refund_no = resp["out_refund_no"]
            .as_str()
            .ok_or_else(|| DomainError::gateway(502, "MALFORMED_RESPONSE", "Missing out_refund_no"))?;
        Ok(GatewayRefund {
            out_refund_no: out_refund_no.to_string(),
            refund_id: resp["refund_id"].as_str().map(String::from),
            status: refund_status_from_wire(resp["status"].as_str().unwrap_or("PROCESSING")),
        })
    }
}

/// AES-256-GCM 解密回调资源，associated_data 作为附加认证数据
pub fn decrypt_resource(api_v3_key: &str, resource: &EncryptedResource) -> DomainResult<String> {
    if resource.algorithm != "AEAD_AES_256_GCM" {
        return Err(DomainError::VerificationError(format!(
            "Unsupported algorithm: {}",
            resource.algorithm
        )));
    }

    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(&resource.ciphertext)
        .map_err(|e| DomainError::VerificationError(format!("Base64 decode error: {}", e)))?;
    if resource.nonce.len() != 12 {
        return Err(DomainError::VerificationError(
            "Nonce must be 12 bytes".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(api_v3_key.as_bytes())
        .map_err(|e| DomainError::CryptoError(format!("AES init error: {}", e)))?;
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(resource.nonce.as_bytes()),
            Payload {
                msg: &ciphertext,
                aad: resource.associated_data.as_bytes(),
            },
        )
        .map_err(|e| DomainError::VerificationError(format!("Decrypt error: {}", e)))?;

    String::from_utf8(plaintext)
        .map_err(|e| DomainError::VerificationError(format!("UTF8 decode error: {}", e)))
}

#[async_trait]
impl PaymentGatewayPort for WeChatPayAdapter {
    /// Native 下单
    async fn create_order(&self, request: GatewayOrderRequest) -> DomainResult<GatewayOrder> {
        let body = json!({
            "appid": self.config.appid,
            "mchid": self.config.mchid,
            "description": request.description,
            "out_trade_no": request.out_trade_no,
            "time_expire": request.time_expire.to_rfc3339_opts(SecondsFormat::Secs, false),
            "attach": request.attach,
            "notify_url": request.notify_url,
            "amount": {
                "total": request.amount_minor_units,
                "currency": request.currency
            }
        });

        let resp = self
            .send_expecting(Method::POST, "/v3/pay/transactions/native", Some(body))
            .await?;
        let code_url = resp["code_url"]
            .as_str()
            .ok_or_else(|| DomainError::gateway(502, "MALFORMED_RESPONSE", "Missing code_url"))?;

        Ok(GatewayOrder {
            payment_target: code_url.to_string(),
        })
    }

    /// 查询订单
    async fn query_order(&self, order_ref: &OrderRef) -> DomainResult<GatewayTransaction> {
        let path = match order_ref {
            OrderRef::OutTradeNo(no) => format!(
                "/v3/pay/transactions/out-trade-no/{}?mchid={}",
                no, self.config.mchid
            ),
            OrderRef::TransactionId(id) => format!(
                "/v3/pay/transactions/id/{}?mchid={}",
                id, self.config.mchid
            ),
        };

        let resp = self.send_expecting(Method::GET, &path, None).await?;
        let out_trade_no = resp["out_trade_no"]
            .as_str()
            .ok_or_else(|| DomainError::gateway(502, "MALFORMED_RESPONSE", "Missing out_trade_no"))?;

        Ok(GatewayTransaction {
            out_trade_no: out_trade_no.to_string(),
            trade_state: TradeState::parse(resp["trade_state"].as_str().unwrap_or("UNKNOWN")),
            transaction_id: resp["transaction_id"].as_str().map(String::from),
            trade_state_desc: resp["trade_state_desc"].as_str().map(String::from),
        })
    }

    /// 关闭订单
    async fn close_order(&self, out_trade_no: &str) -> DomainResult<()> {
        let path = format!("/v3/pay/transactions/out-trade-no/{}/close", out_trade_no);
        self.send(Method::POST, &path, Some(json!({ "mchid": self.config.mchid })))
            .await?;
        Ok(())
    }

    /// 申请退款
    async fn request_refund(&self, request: GatewayRefundRequest) -> DomainResult<GatewayRefund> {
        let body = json!({
            "transaction_id": request.transaction_id,
            "out_trade_no": request.out_trade_no,
            "out_refund_no": request.out_refund_no,
            "reason": request.reason,
            "notify_url": request.notify_url,
            "amount": {
                "refund": request.refund_minor_units,
                "total": request.total_minor_units,
                "currency": request.currency
            }
        });

        let resp = self
            .send_expecting(Method::POST, "/v3/refund/domestic/refunds", Some(body))
            .await?;
        Self::gateway_refund(&resp)
    }

    /// 查询退款
    async fn query_refund(&self, out_refund_no: &str) -> DomainResult<GatewayRefund> {
        let path = format!("/v3/refund/domestic/refunds/{}", out_refund_no);
        let resp = self.send_expecting(Method::GET, &path, None).await?;
        Self::gateway_refund(&resp)
    }

    /// 验证回调签名并解密
    async fn verify_and_decode(&self, raw: &RawNotification) -> DomainResult<DecodedNotification> {
        if raw.signature.starts_with("WECHATPAY/SIGNTEST/") {
            warn!("Rejecting WeChat Pay signature probe");
            return Err(DomainError::VerificationError("Signature probe".to_string()));
        }
        self.verify_signature(raw)?;

        let envelope: NotificationEnvelope<EncryptedResource> = serde_json::from_slice(&raw.body)
            .map_err(|e| DomainError::VerificationError(format!("Malformed notification: {}", e)))?;
        let plaintext = decrypt_resource(&self.config.api_v3_key, &envelope.resource)?;
        debug!(resource_id = %envelope.id, event_type = %envelope.event_type, "Notification decrypted");

        Ok(DecodedNotification {
            resource_id: envelope.id,
            event: decode_event(&envelope.event_type, &plaintext)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn encrypt(plaintext: &str, nonce: &str, aad: &str) -> EncryptedResource {
        let cipher = Aes256Gcm::new_from_slice(KEY.as_bytes()).unwrap();
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(nonce.as_bytes()),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .unwrap();
        EncryptedResource {
            algorithm: "AEAD_AES_256_GCM".to_string(),
            ciphertext: base64::engine::general_purpose::STANDARD.encode(ciphertext),
            nonce: nonce.to_string(),
            associated_data: aad.to_string(),
        }
    }

    #[test]
    fn test_decrypt_resource() {
        let resource = encrypt(r#"{"out_trade_no":"S1"}"#, "fdasflkja484", "transaction");
        assert_eq!(decrypt_resource(KEY, &resource).unwrap(), r#"{"out_trade_no":"S1"}"#);
    }

    #[test]
    fn test_decrypt_rejects_wrong_associated_data() {
        let mut resource = encrypt(r#"{"out_trade_no":"S1"}"#, "fdasflkja484", "transaction");
        resource.associated_data = "refund".to_string();
        let err = decrypt_resource(KEY, &resource).unwrap_err();
        assert!(matches!(err, DomainError::VerificationError(_)));
    }

    #[test]
    fn test_decrypt_rejects_unknown_algorithm() {
        let mut resource = encrypt("{}", "fdasflkja484", "");
        resource.algorithm = "AEAD_SM4_GCM".to_string();
        assert!(decrypt_resource(KEY, &resource).is_err());
    }
}
