use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::value_objects::RefundStatus;
use crate::ports::payment_gateway_port::NotificationEvent;
use serde::{Deserialize, Serialize};

/// 回调通知外层报文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope<R> {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub resource_type: Option<String>,
    pub resource: R,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// 加密的通知资源
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedResource {
    pub algorithm: String,
    pub ciphertext: String,
    pub nonce: String,
    #[serde(default)]
    pub associated_data: String,
}

#[derive(Debug, Deserialize)]
struct TransactionResource {
    out_trade_no: String,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    trade_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResource {
    out_refund_no: String,
    #[serde(default)]
    refund_id: Option<String>,
    refund_status: String,
}

/// 微信退款状态到退款单状态
pub fn refund_status_from_wire(value: &str) -> RefundStatus {
    match value {
        "SUCCESS" => RefundStatus::Succeeded,
        "CLOSED" | "ABNORMAL" => RefundStatus::Failed,
        _ => RefundStatus::Requested,
    }
}

/// 解析解密后的资源明文
pub fn decode_event(event_type: &str, plaintext: &str) -> DomainResult<NotificationEvent> {
    if event_type.starts_with("REFUND.") {
        let refund: RefundResource = serde_json::from_str(plaintext)?;
        return Ok(NotificationEvent::RefundResult {
            out_refund_no: refund.out_refund_no,
            refund_id: refund.refund_id,
            status: refund_status_from_wire(&refund.refund_status),
        });
    }

    let transaction: TransactionResource = serde_json::from_str(plaintext)?;
    let succeeded = event_type == "TRANSACTION.SUCCESS"
        && transaction.trade_state.as_deref().unwrap_or("SUCCESS") == "SUCCESS";
    if !succeeded {
        return Ok(NotificationEvent::TransactionOther {
            event_type: event_type.to_string(),
        });
    }

    let transaction_id = transaction.transaction_id.ok_or_else(|| {
        DomainError::VerificationError(format!(
            "Missing transaction_id in notification for {}",
            transaction.out_trade_no
        ))
    })?;
    Ok(NotificationEvent::TransactionSuccess {
        out_trade_no: transaction.out_trade_no,
        transaction_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_transaction_success() {
        let plaintext = r#"{"out_trade_no":"S1","transaction_id":"4200000940","trade_state":"SUCCESS","amount":{"total":1}}"#;
        let event = decode_event("TRANSACTION.SUCCESS", plaintext).unwrap();
        assert_eq!(
            event,
            NotificationEvent::TransactionSuccess {
                out_trade_no: "S1".to_string(),
                transaction_id: "4200000940".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_refund_result() {
        let plaintext = r#"{"out_trade_no":"S1","out_refund_no":"R1","refund_id":"50300","refund_status":"ABNORMAL"}"#;
        let event = decode_event("REFUND.ABNORMAL", plaintext).unwrap();
        assert_eq!(
            event,
            NotificationEvent::RefundResult {
                out_refund_no: "R1".to_string(),
                refund_id: Some("50300".to_string()),
                status: RefundStatus::Failed,
            }
        );
    }

    #[test]
    fn test_success_without_transaction_id_is_rejected() {
        let result = decode_event("TRANSACTION.SUCCESS", r#"{"out_trade_no":"S1"}"#);
        assert!(matches!(result, Err(DomainError::VerificationError(_))));
    }

    #[test]
    fn test_other_transaction_events_are_passed_through() {
        let event = decode_event("TRANSACTION.CLOSED", r#"{"out_trade_no":"S1"}"#).unwrap();
        assert!(matches!(event, NotificationEvent::TransactionOther { .. }));
    }
}
