//! Order notifications
//!
//! One notification per accepted status transition. Delivery is fire and
//! forget: a failed send is logged and never undoes the transition.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::events::{DomainEvent, OrderEvent, PaymentChange};
use crate::{CommerceError, Result};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotification {
    pub order_id: Uuid,
    pub order_number: String,
    pub email: String,
    pub new_status: OrderStatus,
    pub message: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &OrderNotification) -> Result<()>;
}

/// Publishes notifications to `<prefix>.<status>` for the email service.
pub struct NatsNotifier {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client, subject_prefix: impl Into<String>) -> Self {
        Self { client, subject_prefix: subject_prefix.into() }
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn notify(&self, notification: &OrderNotification) -> Result<()> {
        let subject = format!("{}.{}", self.subject_prefix, notification.new_status);
        let payload = serde_json::to_vec(notification)?;
        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|e| CommerceError::Notification(e.to_string()))
    }
}

/// Used when no message bus is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &OrderNotification) -> Result<()> {
        tracing::info!(order_id = %n.order_id, order_number = %n.order_number, status = %n.new_status, message = %n.message, "Order notification");
        Ok(())
    }
}

/// Sends a notification for every status change in `events` and logs the
/// rest. Returns how many notifications were attempted.
pub async fn dispatch(notifier: &dyn Notifier, order: &Order, events: Vec<DomainEvent>) -> usize {
    let mut attempted = 0;
    for event in events {
        match event {
            DomainEvent::Order(OrderEvent::StatusChanged { order_id, from, to, message }) => {
                tracing::info!(%order_id, order_number = %order.order_number(), %from, %to, "Order status changed");
                let notification = OrderNotification {
                    order_id,
                    order_number: order.order_number().to_string(),
                    email: order.email().to_string(),
                    new_status: to,
                    message,
                };
                attempted += 1;
                if let Err(e) = notifier.notify(&notification).await {
                    tracing::warn!(%order_id, error = %e, "Order notification failed");
                }
            }
            DomainEvent::Order(OrderEvent::FlaggedForReview { order_id, reason }) => {
                tracing::warn!(%order_id, order_number = %order.order_number(), %reason, "Order flagged for manual review");
            }
            DomainEvent::Order(OrderEvent::Cancelled { order_id, reason }) => {
                tracing::info!(%order_id, %reason, "Order cancelled");
            }
            DomainEvent::Payment(PaymentChange::Initiated { order_id, method, correlation_id }) => {
                tracing::info!(%order_id, %method, %correlation_id, "Payment initiated");
            }
            DomainEvent::Payment(PaymentChange::Completed { order_id, amount }) => {
                tracing::info!(%order_id, %amount, "Payment completed");
            }
            DomainEvent::Payment(PaymentChange::Failed { order_id, reason }) => {
                tracing::info!(%order_id, %reason, "Payment failed");
            }
            DomainEvent::Payment(PaymentChange::Refunded { order_id, amount }) => {
                tracing::info!(%order_id, %amount, "Payment refunded");
            }
        }
    }
    attempted
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::domain::aggregates::order::fixtures::placed_order;
    use crate::domain::aggregates::PaymentMethod;
    use crate::domain::services::OrderStateMachine;

    #[tokio::test]
    async fn test_dispatch_only_notifies_status_changes() {
        let order = OrderStateMachine::initiate_payment(&placed_order(PaymentMethod::Card), "gw").unwrap();
        let mut paid = OrderStateMachine::complete_payment(&order, Some("pay")).unwrap();
        let events = paid.take_events();
        assert_eq!(events.len(), 3);

        let notifier = RecordingNotifier::default();
        assert_eq!(dispatch(&notifier, &paid, events).await, 1);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent[0].new_status, OrderStatus::Confirmed);
        assert_eq!(sent[0].message, "Payment completed");
    }

    #[tokio::test]
    async fn test_failed_notification_is_swallowed() {
        let mut paid = OrderStateMachine::complete_payment(&placed_order(PaymentMethod::Card), None).unwrap();
        let events = paid.take_events();
        assert_eq!(dispatch(&FailingNotifier, &paid, events).await, 1);
    }
}
