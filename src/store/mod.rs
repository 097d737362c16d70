//! Order persistence
//!
//! Orders are written whole, guarded by an optimistic version check and,
//! for payment writes, by the stored payment status. The boolean result of
//! `compare_and_swap` is the only signal a caller has that its write won.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::aggregates::{Order, PaymentStatus};
use crate::domain::value_objects::OrderNumber;
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryOrderStore;
pub use postgres::PgOrderStore;

/// Payment statuses a capture or failure may be written over.
pub const OPEN_PAYMENT: &[PaymentStatus] = &[PaymentStatus::Pending, PaymentStatus::Processing];
/// Payment statuses a refund may be written over.
pub const SETTLED_PAYMENT: &[PaymentStatus] = &[PaymentStatus::Completed];

/// Monotonic source for order numbers.
#[async_trait]
pub trait OrderSequence: Send + Sync {
    async fn next_value(&self) -> Result<u64>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>>;

    async fn get_by_number(&self, number: &OrderNumber) -> Result<Option<Order>>;

    /// Finds the order a gateway correlation id was ever attached to.
    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Order>>;

    /// Replaces the stored order with `next` if the stored version still equals
    /// `next.version()` and, when `payment_status_in` is given, the stored
    /// payment status is one of them. The stored version is bumped on success.
    async fn compare_and_swap(&self, next: &Order, payment_status_in: Option<&[PaymentStatus]>) -> Result<bool>;
}
