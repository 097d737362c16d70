//! UPI / wallet gateway adapter
//!
//! The wallet provider signs a canonical string rather than the body:
//! `merchantOrderId|transactionId|state|amount`.

use serde::Deserialize;

use super::{verify_signature, PaymentEvent, PaymentGatewayAdapter, PaymentOutcome};
use crate::domain::aggregates::PaymentMethod;
use crate::Result;

pub const SIGNATURE_HEADER: &str = "x-wallet-gateway-signature";

#[derive(Clone)]
pub struct WalletGatewayAdapter {
    secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Notification {
    merchant_order_id: String,
    transaction_id: String,
    state: String,
    amount: i64,
    error_code: Option<String>,
}

impl Notification {
    fn canonical(&self) -> String {
        format!("{}|{}|{}|{}", self.merchant_order_id, self.transaction_id, self.state, self.amount)
    }
}

impl WalletGatewayAdapter {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

impl PaymentGatewayAdapter for WalletGatewayAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Wallet
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn verify(&self, raw_payload: &[u8], signature: Option<&str>) -> Result<Option<PaymentEvent>> {
        // The body has to be parsed to build the signing string, but none of
        // it is acted on until the signature matches.
        let notification: Notification = serde_json::from_slice(raw_payload)?;
        verify_signature(&self.secret, notification.canonical().as_bytes(), signature)?;

        let outcome = match notification.state.as_str() {
            "COMPLETED" => PaymentOutcome::Captured,
            "FAILED" => PaymentOutcome::Failed,
            "REFUNDED" => PaymentOutcome::Refunded,
            other => {
                tracing::debug!(state = other, "Ignoring wallet gateway notification");
                return Ok(None);
            }
        };

        Ok(Some(PaymentEvent {
            method: PaymentMethod::Wallet,
            provider_correlation_id: notification.merchant_order_id,
            provider_transaction_id: Some(notification.transaction_id),
            outcome,
            amount: notification.amount,
            failure_reason: notification.error_code,
        }))
    }
}
