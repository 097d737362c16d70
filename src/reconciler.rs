//! Payment reconciliation
//!
//! Webhooks and client confirmations both end up in [`PaymentReconciler::reconcile`].
//! It may run concurrently with itself for the same order: every write is a
//! compare-and-swap on the stored order, and whoever loses re-reads the order
//! and finds it already settled.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus, PaymentMethod, PaymentStatus};
use crate::domain::services::OrderStateMachine;
use crate::domain::value_objects::{from_minor_units, to_minor_units};
use crate::gateway::{PaymentEvent, PaymentOutcome};
use crate::notify::{dispatch, Notifier};
use crate::store::{OrderStore, OPEN_PAYMENT, SETTLED_PAYMENT};
use crate::{CommerceError, Result};

const MAX_CAS_ATTEMPTS: usize = 5;
const COD_PENDING: &[PaymentStatus] = &[PaymentStatus::Pending];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Payment recorded as completed by this call.
    Captured { order_id: Uuid, order_status: OrderStatus },
    /// Payment recorded as failed by this call.
    Failed { order_id: Uuid },
    /// Payment recorded as refunded by this call.
    Refunded { order_id: Uuid },
    /// The event carried nothing new.
    AlreadyReconciled { order_id: Uuid },
    /// The event could not be applied and the order now waits for an operator.
    FlaggedForReview { order_id: Uuid, reason: String },
}

enum Plan {
    Done(ReconcileOutcome),
    Write { next: Order, guard: &'static [PaymentStatus], outcome: ReconcileOutcome },
    Flag { reason: String, then: Result<ReconcileOutcome> },
}

pub struct PaymentReconciler {
    store: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
}

impl PaymentReconciler {
    pub fn new(store: Arc<dyn OrderStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn reconcile(&self, event: &PaymentEvent) -> Result<ReconcileOutcome> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let order = self.lookup(event).await?;
            let order_id = order.id();

            match plan(&order, event) {
                Plan::Done(outcome) => {
                    tracing::debug!(%order_id, correlation_id = %event.provider_correlation_id, ?outcome, "Payment event already reconciled");
                    return Ok(outcome);
                }
                Plan::Write { next, guard, outcome } => {
                    if self.commit(next, Some(guard)).await? {
                        tracing::info!(%order_id, correlation_id = %event.provider_correlation_id, ?outcome, "Payment event reconciled");
                        return Ok(outcome);
                    }
                    tracing::debug!(%order_id, "Lost reconcile race, re-reading order");
                }
                Plan::Flag { reason, then } => {
                    if order.review().is_some() {
                        return then;
                    }
                    let next = OrderStateMachine::flag_for_review(&order, &reason);
                    if self.commit(next, None).await? {
                        return then;
                    }
                    tracing::debug!(%order_id, "Lost race while flagging order, re-reading");
                }
            }
        }
        tracing::error!(correlation_id = %event.provider_correlation_id, "Gave up reconciling after repeated write conflicts");
        Err(CommerceError::Conflict)
    }

    async fn lookup(&self, event: &PaymentEvent) -> Result<Order> {
        let Some(order) = self.store.find_by_correlation_id(&event.provider_correlation_id).await? else {
            tracing::warn!(correlation_id = %event.provider_correlation_id, provider = %event.method, "Payment event for unknown order");
            return Err(CommerceError::OrderNotFound);
        };
        if order.payment().method != event.method {
            tracing::warn!(
                order_id = %order.id(),
                correlation_id = %event.provider_correlation_id,
                provider = %event.method,
                expected = %order.payment().method,
                "Payment event from a provider the order does not use"
            );
            return Err(CommerceError::OrderNotFound);
        }
        Ok(order)
    }

    async fn commit(&self, mut next: Order, guard: Option<&[PaymentStatus]>) -> Result<bool> {
        if !self.store.compare_and_swap(&next, guard).await? {
            return Ok(false);
        }
        let events = next.take_events();
        dispatch(self.notifier.as_ref(), &next, events).await;
        Ok(true)
    }
}

fn plan(order: &Order, event: &PaymentEvent) -> Plan {
    if order.payment().method == PaymentMethod::Cod {
        return plan_cash_collection(order, event);
    }
    match event.outcome {
        PaymentOutcome::Captured => plan_capture(order, event),
        PaymentOutcome::Failed => plan_failure(order, event),
        PaymentOutcome::Refunded => plan_refund(order, event),
    }
}

fn amount_check(order: &Order, event: &PaymentEvent) -> Option<Plan> {
    if event.amount == to_minor_units(order.total()) {
        return None;
    }
    let error = CommerceError::amount_mismatch(order.total(), event.amount);
    tracing::warn!(
        order_id = %order.id(),
        expected = %order.total(),
        received = %from_minor_units(event.amount),
        provider = %event.method,
        "Payment amount does not match order total"
    );
    Some(Plan::Flag { reason: error.to_string(), then: Err(error) })
}

fn already(order: &Order) -> Plan {
    Plan::Done(ReconcileOutcome::AlreadyReconciled { order_id: order.id() })
}

fn flag(order: &Order, reason: &str) -> Plan {
    Plan::Flag {
        reason: reason.to_string(),
        then: Ok(ReconcileOutcome::FlaggedForReview { order_id: order.id(), reason: reason.to_string() }),
    }
}

fn write(order: &Order, next: Result<Order>, guard: &'static [PaymentStatus], outcome: ReconcileOutcome) -> Plan {
    match next {
        Ok(next) => Plan::Write { next, guard, outcome },
        Err(e) => {
            tracing::error!(order_id = %order.id(), error = %e, "State machine rejected a reconcile write");
            Plan::Flag { reason: format!("unexpected state: {e}"), then: Err(e) }
        }
    }
}

fn plan_capture(order: &Order, event: &PaymentEvent) -> Plan {
    if let Some(mismatch) = amount_check(order, event) {
        return mismatch;
    }
    match order.payment().status {
        PaymentStatus::Completed | PaymentStatus::Refunded => already(order),
        PaymentStatus::Failed => flag(order, "capture received after the payment was recorded as failed"),
        PaymentStatus::Pending | PaymentStatus::Processing => {
            let next = OrderStateMachine::complete_payment(order, event.provider_transaction_id.as_deref());
            let order_status = next.as_ref().map(|n| n.status()).unwrap_or(order.status());
            write(order, next, OPEN_PAYMENT, ReconcileOutcome::Captured { order_id: order.id(), order_status })
        }
    }
}

fn plan_failure(order: &Order, event: &PaymentEvent) -> Plan {
    match order.payment().status {
        PaymentStatus::Pending | PaymentStatus::Processing => {
            let reason = event.failure_reason.as_deref().unwrap_or("declined by gateway");
            let next = OrderStateMachine::fail_payment(order, event.provider_transaction_id.as_deref(), reason);
            write(order, next, OPEN_PAYMENT, ReconcileOutcome::Failed { order_id: order.id() })
        }
        // a late failure never downgrades a settled payment
        PaymentStatus::Completed | PaymentStatus::Refunded | PaymentStatus::Failed => already(order),
    }
}

fn plan_refund(order: &Order, event: &PaymentEvent) -> Plan {
    match order.payment().status {
        PaymentStatus::Refunded => already(order),
        PaymentStatus::Completed => {
            if let Some(mismatch) = amount_check(order, event) {
                return mismatch;
            }
            let next = OrderStateMachine::refund_payment(order);
            write(order, next, SETTLED_PAYMENT, ReconcileOutcome::Refunded { order_id: order.id() })
        }
        PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Failed => {
            flag(order, "refund received for a payment that was never recorded as completed")
        }
    }
}

/// Cash on delivery never goes through the gateway capture path: the order was
/// confirmed at placement and the payment settles when the courier reports
/// the cash collected.
fn plan_cash_collection(order: &Order, event: &PaymentEvent) -> Plan {
    if event.outcome != PaymentOutcome::Captured {
        return already(order);
    }
    if order.payment().status == PaymentStatus::Completed {
        return already(order);
    }
    if let Some(mismatch) = amount_check(order, event) {
        return mismatch;
    }
    if order.status() != OrderStatus::Delivered {
        return flag(order, "cash collected before delivery was recorded");
    }
    let next = OrderStateMachine::collect_cash(order, event.provider_transaction_id.as_deref());
    write(order, next, COD_PENDING, ReconcileOutcome::Captured { order_id: order.id(), order_status: OrderStatus::Delivered })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::fixtures::placed_order;
    use crate::domain::aggregates::{OrderStatus, RefundStatus};
    use crate::notify::testing::RecordingNotifier;
    use crate::store::InMemoryOrderStore;

    struct Harness {
        store: Arc<InMemoryOrderStore>,
        notifier: Arc<RecordingNotifier>,
        reconciler: Arc<PaymentReconciler>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryOrderStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let reconciler = Arc::new(PaymentReconciler::new(store.clone(), notifier.clone()));
        Harness { store, notifier, reconciler }
    }

    async fn initiated(h: &Harness, method: PaymentMethod, correlation: &str) -> Order {
        let order = placed_order(method);
        h.store.insert(&order).await.unwrap();
        let next = OrderStateMachine::initiate_payment(&order, correlation).unwrap();
        assert!(h.store.compare_and_swap(&next, None).await.unwrap());
        h.store.get(order.id()).await.unwrap().unwrap()
    }

    fn event(order: &Order, correlation: &str, outcome: PaymentOutcome) -> PaymentEvent {
        PaymentEvent {
            method: order.payment().method,
            provider_correlation_id: correlation.to_string(),
            provider_transaction_id: Some("pay_1".into()),
            outcome,
            amount: to_minor_units(order.total()),
            failure_reason: None,
        }
    }

    fn confirmed_entries(order: &Order) -> usize {
        order.timeline().iter().filter(|e| e.status == OrderStatus::Confirmed && e.message == "Payment completed").count()
    }

    #[tokio::test]
    async fn test_capture_confirms_order() {
        let h = harness();
        let order = initiated(&h, PaymentMethod::Card, "gw_1").await;
        let outcome = h.reconciler.reconcile(&event(&order, "gw_1", PaymentOutcome::Captured)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Captured { order_id: order.id(), order_status: OrderStatus::Confirmed });

        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Confirmed);
        assert_eq!(stored.payment().status, PaymentStatus::Completed);
        assert!(stored.payment().paid_at.is_some());
        assert_eq!(h.notifier.count(OrderStatus::Confirmed), 1);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_idempotent() {
        let h = harness();
        let order = initiated(&h, PaymentMethod::Card, "gw_1").await;
        let e = event(&order, "gw_1", PaymentOutcome::Captured);
        h.reconciler.reconcile(&e).await.unwrap();
        let second = h.reconciler.reconcile(&e).await.unwrap();
        assert_eq!(second, ReconcileOutcome::AlreadyReconciled { order_id: order.id() });

        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(confirmed_entries(&stored), 1);
        assert_eq!(h.notifier.count(OrderStatus::Confirmed), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reconcile_has_one_winner() {
        for round in 0..20 {
            let h = harness();
            let correlation = format!("gw_race_{round}");
            let order = initiated(&h, PaymentMethod::Card, &correlation).await;
            let e = event(&order, &correlation, PaymentOutcome::Captured);

            let tasks: Vec<_> = (0..2)
                .map(|_| {
                    let reconciler = h.reconciler.clone();
                    let e = e.clone();
                    tokio::spawn(async move { reconciler.reconcile(&e).await.unwrap() })
                })
                .collect();
            let mut outcomes = Vec::new();
            for task in tasks {
                outcomes.push(task.await.unwrap());
            }

            let winners = outcomes.iter().filter(|o| matches!(o, ReconcileOutcome::Captured { .. })).count();
            let losers = outcomes.iter().filter(|o| matches!(o, ReconcileOutcome::AlreadyReconciled { .. })).count();
            assert_eq!((winners, losers), (1, 1));

            let stored = h.store.get(order.id()).await.unwrap().unwrap();
            assert_eq!(stored.status(), OrderStatus::Confirmed);
            assert_eq!(stored.payment().status, PaymentStatus::Completed);
            assert_eq!(confirmed_entries(&stored), 1);
            assert_eq!(h.notifier.count(OrderStatus::Confirmed), 1);
        }
    }

    #[tokio::test]
    async fn test_amount_mismatch_flags_without_confirming() {
        let h = harness();
        let order = initiated(&h, PaymentMethod::Card, "gw_1").await;
        let mut e = event(&order, "gw_1", PaymentOutcome::Captured);
        e.amount -= 1;
        let err = h.reconciler.reconcile(&e).await.unwrap_err();
        assert!(matches!(err, CommerceError::AmountMismatch { .. }));

        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Pending);
        assert_eq!(stored.payment().status, PaymentStatus::Processing);
        assert!(stored.review().is_some());
        assert_eq!(h.notifier.count(OrderStatus::Confirmed), 0);
    }

    #[tokio::test]
    async fn test_unknown_correlation() {
        let h = harness();
        let order = placed_order(PaymentMethod::Card);
        let err = h.reconciler.reconcile(&event(&order, "gw_other_env", PaymentOutcome::Captured)).await.unwrap_err();
        assert!(matches!(err, CommerceError::OrderNotFound));
    }

    #[tokio::test]
    async fn test_failure_keeps_order_pending() {
        let h = harness();
        let order = initiated(&h, PaymentMethod::Wallet, "w_1").await;
        let mut e = event(&order, "w_1", PaymentOutcome::Failed);
        e.failure_reason = Some("UPI_TIMEOUT".into());
        assert_eq!(h.reconciler.reconcile(&e).await.unwrap(), ReconcileOutcome::Failed { order_id: order.id() });

        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Pending);
        assert_eq!(stored.payment().status, PaymentStatus::Failed);
        assert_eq!(stored.timeline().last().unwrap().message, "Payment failed: UPI_TIMEOUT");
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_late_failure_does_not_downgrade() {
        let h = harness();
        let order = initiated(&h, PaymentMethod::Card, "gw_1").await;
        h.reconciler.reconcile(&event(&order, "gw_1", PaymentOutcome::Captured)).await.unwrap();
        let outcome = h.reconciler.reconcile(&event(&order, "gw_1", PaymentOutcome::Failed)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::AlreadyReconciled { order_id: order.id() });
        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.payment().status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_refund_after_capture() {
        let h = harness();
        let order = initiated(&h, PaymentMethod::Card, "gw_1").await;
        h.reconciler.reconcile(&event(&order, "gw_1", PaymentOutcome::Captured)).await.unwrap();
        let refund = event(&order, "gw_1", PaymentOutcome::Refunded);
        assert_eq!(h.reconciler.reconcile(&refund).await.unwrap(), ReconcileOutcome::Refunded { order_id: order.id() });
        assert_eq!(
            h.reconciler.reconcile(&refund).await.unwrap(),
            ReconcileOutcome::AlreadyReconciled { order_id: order.id() }
        );
        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Refunded);
        assert_eq!(stored.payment().status, PaymentStatus::Refunded);
        assert_eq!(h.notifier.count(OrderStatus::Refunded), 1);
    }

    #[tokio::test]
    async fn test_refund_before_capture_is_flagged() {
        let h = harness();
        let order = initiated(&h, PaymentMethod::Card, "gw_1").await;
        let outcome = h.reconciler.reconcile(&event(&order, "gw_1", PaymentOutcome::Refunded)).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::FlaggedForReview { .. }));
        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.payment().status, PaymentStatus::Processing);
        assert!(stored.review().is_some());
    }

    #[tokio::test]
    async fn test_capture_on_cancelled_order_owes_refund() {
        let h = harness();
        let order = initiated(&h, PaymentMethod::Card, "gw_1").await;
        let cancelled = OrderStateMachine::cancel(&order, "changed mind", Some("cust-1")).unwrap();
        assert!(h.store.compare_and_swap(&cancelled, None).await.unwrap());

        let outcome = h.reconciler.reconcile(&event(&order, "gw_1", PaymentOutcome::Captured)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Captured { order_id: order.id(), order_status: OrderStatus::Cancelled });
        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.cancellation().unwrap().refund_status, RefundStatus::Full);
        assert!(stored.review().is_some());
    }

    #[tokio::test]
    async fn test_cash_on_delivery_collection() {
        let h = harness();
        let order = placed_order(PaymentMethod::Cod);
        let order = OrderStateMachine::transition(&order, OrderStatus::Confirmed, "cod", None).unwrap();
        h.store.insert(&order).await.unwrap();
        let correlation = order.order_number().to_string();

        // collected before the delivery was recorded
        let early = h.reconciler.reconcile(&event(&order, &correlation, PaymentOutcome::Captured)).await.unwrap();
        assert!(matches!(early, ReconcileOutcome::FlaggedForReview { .. }));

        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        let delivered = [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered]
            .into_iter()
            .fold(stored, |o, s| OrderStateMachine::transition(&o, s, "step", None).unwrap());
        assert!(h.store.compare_and_swap(&delivered, None).await.unwrap());

        let outcome = h.reconciler.reconcile(&event(&order, &correlation, PaymentOutcome::Captured)).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Captured { order_id: order.id(), order_status: OrderStatus::Delivered });
        let stored = h.store.get(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.payment().status, PaymentStatus::Completed);
        assert_eq!(stored.status(), OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn test_provider_mismatch_is_foreign() {
        let h = harness();
        let order = initiated(&h, PaymentMethod::Card, "gw_1").await;
        let mut e = event(&order, "gw_1", PaymentOutcome::Captured);
        e.method = PaymentMethod::Wallet;
        assert!(matches!(h.reconciler.reconcile(&e).await, Err(CommerceError::OrderNotFound)));
    }
}
