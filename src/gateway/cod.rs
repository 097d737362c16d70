//! Cash-on-delivery courier callback adapter
//!
//! The courier reports cash collected at the door. The callback is signed over
//! the raw body and references the order by its order number, which is the
//! correlation id of every COD order.

use serde::Deserialize;

use super::{verify_signature, PaymentEvent, PaymentGatewayAdapter, PaymentOutcome};
use crate::domain::aggregates::PaymentMethod;
use crate::Result;

pub const SIGNATURE_HEADER: &str = "x-cod-courier-signature";

#[derive(Clone)]
pub struct CodAdapter {
    secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Collection {
    order_number: String,
    receipt_id: String,
    amount_collected: i64,
    status: String,
}

impl CodAdapter {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

impl PaymentGatewayAdapter for CodAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Cod
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn verify(&self, raw_payload: &[u8], signature: Option<&str>) -> Result<Option<PaymentEvent>> {
        verify_signature(&self.secret, raw_payload, signature)?;
        let collection: Collection = serde_json::from_slice(raw_payload)?;
        if collection.status != "collected" {
            tracing::debug!(status = %collection.status, order_number = %collection.order_number, "Ignoring courier callback");
            return Ok(None);
        }

        Ok(Some(PaymentEvent {
            method: PaymentMethod::Cod,
            provider_correlation_id: collection.order_number,
            provider_transaction_id: Some(collection.receipt_id),
            outcome: PaymentOutcome::Captured,
            amount: collection.amount_collected,
            failure_reason: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::sign;

    #[test]
    fn test_collected() {
        let raw = br#"{"orderNumber":"ORD000001","receiptId":"R-9","amountCollected":132750,"status":"collected"}"#;
        let event = CodAdapter::new("cod").verify(raw, Some(&sign("cod", raw))).unwrap().unwrap();
        assert_eq!(event.provider_correlation_id, "ORD000001");
        assert_eq!(event.method, PaymentMethod::Cod);
        assert_eq!(event.outcome, PaymentOutcome::Captured);
    }

    #[test]
    fn test_refused_ignored() {
        let raw = br#"{"orderNumber":"ORD000001","receiptId":"R-9","amountCollected":0,"status":"refused"}"#;
        assert_eq!(CodAdapter::new("cod").verify(raw, Some(&sign("cod", raw))).unwrap(), None);
    }
}
