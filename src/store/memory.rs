//! In-memory order store for development and tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OrderSequence, OrderStore};
use crate::domain::aggregates::{Order, PaymentStatus};
use crate::domain::value_objects::OrderNumber;
use crate::{CommerceError, Result};

#[derive(Default)]
struct Inner {
    orders: HashMap<Uuid, Order>,
    by_number: HashMap<OrderNumber, Uuid>,
    by_correlation: HashMap<String, Uuid>,
}

/// Thread-safe order store. A single write lock makes every
/// `compare_and_swap` atomic.
#[derive(Default)]
pub struct InMemoryOrderStore {
    inner: RwLock<Inner>,
    sequence: AtomicU64,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stored(order: &Order) -> Order {
    let mut copy = order.clone();
    copy.events.clear();
    copy
}

#[async_trait]
impl OrderSequence for InMemoryOrderStore {
    async fn next_value(&self) -> Result<u64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.orders.contains_key(&order.id) || inner.by_number.contains_key(&order.order_number) {
            return Err(CommerceError::Storage(format!("order {} already exists", order.order_number)));
        }
        inner.by_number.insert(order.order_number.clone(), order.id);
        if let Some(correlation) = &order.payment.provider_correlation_id {
            inner.by_correlation.insert(correlation.clone(), order.id);
        }
        inner.orders.insert(order.id, stored(order));
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.inner.read().await.orders.get(&id).cloned())
    }

    async fn get_by_number(&self, number: &OrderNumber) -> Result<Option<Order>> {
        let inner = self.inner.read().await;
        Ok(inner.by_number.get(number).and_then(|id| inner.orders.get(id)).cloned())
    }

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Order>> {
        let inner = self.inner.read().await;
        Ok(inner.by_correlation.get(correlation_id).and_then(|id| inner.orders.get(id)).cloned())
    }

    async fn compare_and_swap(&self, next: &Order, payment_status_in: Option<&[PaymentStatus]>) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(current) = inner.orders.get(&next.id) else {
            return Err(CommerceError::OrderNotFound);
        };
        if current.version != next.version {
            return Ok(false);
        }
        if let Some(allowed) = payment_status_in {
            if !allowed.contains(&current.payment.status) {
                return Ok(false);
            }
        }

        let mut record = stored(next);
        record.version += 1;
        if let Some(correlation) = &record.payment.provider_correlation_id {
            inner.by_correlation.entry(correlation.clone()).or_insert(record.id);
        }
        inner.orders.insert(record.id, record);
        Ok(true)
    }
}
