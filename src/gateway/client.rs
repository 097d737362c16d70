//! Gateway REST clients
//!
//! Used to open a gateway order when the customer starts paying, and to fetch
//! the gateway's own view of a payment when the browser claims it succeeded.

use async_trait::async_trait;
use serde::Deserialize;

use super::{PaymentEvent, PaymentOutcome};
use crate::domain::aggregates::{Order, PaymentMethod};
use crate::domain::value_objects::to_minor_units;
use crate::{CommerceError, Result};

#[async_trait]
pub trait PaymentProviderClient: Send + Sync {
    /// Opens a gateway order for the order total and returns its id, which
    /// becomes the order's correlation id.
    async fn create_payment(&self, order: &Order) -> Result<String>;

    /// Authoritative state of the payment behind `correlation_id`. `None`
    /// until the gateway reports a capture or a definitive failure.
    async fn fetch_payment(&self, correlation_id: &str) -> Result<Option<PaymentEvent>>;
}

#[derive(Clone)]
pub struct HttpProviderClient {
    method: PaymentMethod,
    base_url: String,
    key_id: String,
    key_secret: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CreatedOrder {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PaymentList {
    items: Vec<PaymentAttempt>,
}

#[derive(Debug, Deserialize)]
struct PaymentAttempt {
    id: String,
    amount: i64,
    status: String,
    error_description: Option<String>,
}

impl HttpProviderClient {
    pub fn new(method: PaymentMethod, base_url: impl Into<String>, key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            method,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            http: reqwest::Client::new(),
        }
    }
}

/// A capture wins over any number of failed attempts. Failure is only final
/// once every attempt has failed.
fn settle(method: PaymentMethod, correlation_id: &str, attempts: Vec<PaymentAttempt>) -> Option<PaymentEvent> {
    let event = |attempt: PaymentAttempt, outcome| PaymentEvent {
        method,
        provider_correlation_id: correlation_id.to_string(),
        provider_transaction_id: Some(attempt.id),
        outcome,
        amount: attempt.amount,
        failure_reason: attempt.error_description,
    };

    if attempts.is_empty() {
        return None;
    }
    let all_failed = attempts.iter().all(|a| a.status == "failed");
    let mut attempts = attempts.into_iter();
    if all_failed {
        return attempts.last().map(|a| event(a, PaymentOutcome::Failed));
    }
    attempts.find(|a| a.status == "captured").map(|a| event(a, PaymentOutcome::Captured))
}

#[async_trait]
impl PaymentProviderClient for HttpProviderClient {
    async fn create_payment(&self, order: &Order) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&serde_json::json!({
                "amount": to_minor_units(order.total()),
                "currency": order.currency(),
                "receipt": order.order_number().as_str(),
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CommerceError::Provider(format!("{} gateway returned {}", self.method, response.status())));
        }
        let created: CreatedOrder = response.json().await?;
        Ok(created.id)
    }

    async fn fetch_payment(&self, correlation_id: &str) -> Result<Option<PaymentEvent>> {
        let response = self
            .http
            .get(format!("{}/orders/{}/payments", self.base_url, correlation_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CommerceError::Provider(format!("{} gateway returned {}", self.method, response.status())));
        }
        let list: PaymentList = response.json().await?;
        Ok(settle(self.method, correlation_id, list.items))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(id: &str, status: &str) -> PaymentAttempt {
        PaymentAttempt { id: id.into(), amount: 1000, status: status.into(), error_description: None }
    }

    #[test]
    fn test_capture_wins() {
        let event = settle(PaymentMethod::Card, "o1", vec![attempt("p1", "failed"), attempt("p2", "captured")]).unwrap();
        assert_eq!(event.outcome, PaymentOutcome::Captured);
        assert_eq!(event.provider_transaction_id.as_deref(), Some("p2"));
    }

    #[test]
    fn test_all_failed() {
        let event = settle(PaymentMethod::Card, "o1", vec![attempt("p1", "failed"), attempt("p2", "failed")]).unwrap();
        assert_eq!(event.outcome, PaymentOutcome::Failed);
        assert_eq!(event.provider_transaction_id.as_deref(), Some("p2"));
    }

    #[test]
    fn test_nothing_final_yet() {
        assert!(settle(PaymentMethod::Wallet, "o1", vec![]).is_none());
        assert!(settle(PaymentMethod::Wallet, "o1", vec![attempt("p1", "authorized")]).is_none());
    }
}
