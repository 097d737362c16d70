//! Domain events
//!
//! Raised on the next order value by the state machine and drained by the
//! caller once that value has been persisted.
use crate::domain::aggregates::order::{OrderStatus, PaymentMethod};
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub enum DomainEvent {
    Order(OrderEvent),
    Payment(PaymentChange),
}

#[derive(Clone, Debug, PartialEq)]
pub enum OrderEvent {
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus, message: String },
    Cancelled { order_id: Uuid, reason: String },
    FlaggedForReview { order_id: Uuid, reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum PaymentChange {
    Initiated { order_id: Uuid, method: PaymentMethod, correlation_id: String },
    Completed { order_id: Uuid, amount: Decimal },
    Failed { order_id: Uuid, reason: String },
    Refunded { order_id: Uuid, amount: Decimal },
}
