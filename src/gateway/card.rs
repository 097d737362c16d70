//! Card gateway adapter
//!
//! Webhooks are signed over the raw request body with the webhook secret.

use serde::Deserialize;

use super::{verify_signature, PaymentEvent, PaymentGatewayAdapter, PaymentOutcome};
use crate::domain::aggregates::PaymentMethod;
use crate::{CommerceError, Result};

pub const SIGNATURE_HEADER: &str = "x-card-gateway-signature";

#[derive(Clone)]
pub struct CardGatewayAdapter {
    webhook_secret: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    payload: Payload,
}

#[derive(Debug, Deserialize)]
struct Payload {
    payment: Payment,
    refund: Option<Refund>,
}

#[derive(Debug, Deserialize)]
struct Payment {
    id: String,
    order_id: String,
    amount: i64,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Refund {
    amount: i64,
}

impl CardGatewayAdapter {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self { webhook_secret: webhook_secret.into() }
    }
}

impl PaymentGatewayAdapter for CardGatewayAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Card
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn verify(&self, raw_payload: &[u8], signature: Option<&str>) -> Result<Option<PaymentEvent>> {
        verify_signature(&self.webhook_secret, raw_payload, signature)?;
        let envelope: Envelope = serde_json::from_slice(raw_payload)?;

        let payment = envelope.payload.payment;
        let (outcome, amount) = match envelope.event.as_str() {
            "payment.captured" => (PaymentOutcome::Captured, payment.amount),
            "payment.failed" => (PaymentOutcome::Failed, payment.amount),
            "refund.processed" => {
                let refund = envelope
                    .payload
                    .refund
                    .ok_or_else(|| CommerceError::MalformedPayload("refund event without refund entity".into()))?;
                (PaymentOutcome::Refunded, refund.amount)
            }
            other => {
                tracing::debug!(event = other, "Ignoring card gateway event");
                return Ok(None);
            }
        };

        Ok(Some(PaymentEvent {
            method: PaymentMethod::Card,
            provider_correlation_id: payment.order_id,
            provider_transaction_id: Some(payment.id),
            outcome,
            amount,
            failure_reason: payment.error_description,
        }))
    }
}
