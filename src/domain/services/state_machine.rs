//! Order status state machine
//!
//! Every change to an order goes through here. Each operation takes the
//! current order by reference and returns the next value; nothing is written
//! until a store accepts that value.
//!
//! ```text
//! pending -> confirmed -> processing -> shipped -> delivered
//! pending | confirmed -> cancelled
//! confirmed | processing | shipped | delivered | cancelled -> refunded   (payment completed)
//! ```
//!
//! Payment status moves on its own axis:
//!
//! ```text
//! pending | failed -> processing
//! pending | processing -> completed | failed
//! completed -> refunded
//! ```

use chrono::Utc;
use rust_decimal::Decimal;

use crate::domain::aggregates::order::{
    Cancellation, Order, OrderStatus, PaymentMethod, PaymentStatus, RefundStatus, ReviewFlag, TimelineEntry,
};
use crate::domain::events::{DomainEvent, OrderEvent, PaymentChange};
use crate::{CommerceError, Result};

/// Payment statuses a new gateway payment may be started from.
pub const INITIABLE_PAYMENT: &[PaymentStatus] = &[PaymentStatus::Pending, PaymentStatus::Processing, PaymentStatus::Failed];

pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Whether `from -> to` is an edge of the order status graph. Self-loops are
    /// not edges; `transition` treats them as no-ops instead.
    pub fn is_valid_edge(from: OrderStatus, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (from, to),
            (Pending, Confirmed)
                | (Confirmed, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending | Confirmed, Cancelled)
                | (Confirmed | Processing | Shipped | Delivered | Cancelled, Refunded)
        )
    }

    /// Moves the order to `target`, appending a timeline entry and raising a
    /// status change event. Reaching the current status again returns the order
    /// unchanged, so redelivered updates are harmless.
    pub fn transition(order: &Order, target: OrderStatus, message: &str, actor: Option<&str>) -> Result<Order> {
        if order.status == target {
            return Ok(order.clone());
        }
        if target == OrderStatus::Cancelled {
            return Self::cancel(order, message, actor);
        }
        if !Self::is_valid_edge(order.status, target) {
            return Err(CommerceError::invalid_transition(order.status, target));
        }
        if target == OrderStatus::Refunded && !matches!(order.payment.status, PaymentStatus::Completed | PaymentStatus::Refunded) {
            return Err(CommerceError::invalid_transition(order.status, "refunded (payment not completed)"));
        }
        // Gateway orders are confirmed by payment reconciliation only.
        if target == OrderStatus::Confirmed
            && order.payment.method != PaymentMethod::Cod
            && order.payment.status != PaymentStatus::Completed
        {
            return Err(CommerceError::invalid_transition(order.status, "confirmed (payment not completed)"));
        }

        let mut next = order.clone();
        apply_status(&mut next, target, message, actor);
        Ok(next)
    }

    /// Ships the order, recording carrier details when given.
    pub fn ship(order: &Order, tracking_number: Option<&str>, carrier: Option<&str>, actor: Option<&str>) -> Result<Order> {
        let message = match tracking_number {
            Some(number) => format!("Order shipped, tracking number {number}"),
            None => "Order shipped".to_string(),
        };
        let mut next = Self::transition(order, OrderStatus::Shipped, &message, actor)?;
        if let Some(number) = tracking_number {
            next.tracking.tracking_number = Some(number.to_string());
        }
        if let Some(carrier) = carrier {
            next.tracking.carrier = Some(carrier.to_string());
        }
        Ok(next)
    }

    /// Cancels a pending or confirmed order. A completed payment marks the
    /// cancellation as owed a full refund; issuing it is up to the gateway.
    pub fn cancel(order: &Order, reason: &str, cancelled_by: Option<&str>) -> Result<Order> {
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::Confirmed) {
            return Err(CommerceError::invalid_transition(order.status, OrderStatus::Cancelled));
        }
        let refund_status = if order.payment.status == PaymentStatus::Completed { RefundStatus::Full } else { RefundStatus::None };

        let mut next = order.clone();
        next.cancellation = Some(Cancellation {
            reason: reason.to_string(),
            cancelled_at: Utc::now(),
            cancelled_by: cancelled_by.map(str::to_string),
            refund_status,
        });
        apply_status(&mut next, OrderStatus::Cancelled, &format!("Order cancelled: {reason}"), cancelled_by);
        next.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: next.id, reason: reason.to_string() }));
        Ok(next)
    }

    /// Whether a gateway payment may be started for the order right now.
    pub fn ensure_payment_initiable(order: &Order) -> Result<()> {
        if order.payment.method == PaymentMethod::Cod {
            return Err(CommerceError::PaymentNotInitiable("cash on delivery orders are paid to the courier".into()));
        }
        if order.status != OrderStatus::Pending {
            return Err(CommerceError::PaymentNotInitiable(format!("order is {}", order.status)));
        }
        if !INITIABLE_PAYMENT.contains(&order.payment.status) {
            return Err(CommerceError::PaymentNotInitiable(format!("payment is {}", order.payment.status)));
        }
        Ok(())
    }

    /// Records that a gateway payment was started under `correlation_id`.
    pub fn initiate_payment(order: &Order, correlation_id: &str) -> Result<Order> {
        Self::ensure_payment_initiable(order)?;

        let mut next = order.clone();
        next.payment.status = PaymentStatus::Processing;
        next.payment.provider_correlation_id = Some(correlation_id.to_string());
        next.payment.failure_reason = None;
        next.touch();
        next.raise_event(DomainEvent::Payment(PaymentChange::Initiated {
            order_id: next.id,
            method: next.payment.method,
            correlation_id: correlation_id.to_string(),
        }));
        Ok(next)
    }

    /// Marks a gateway payment captured. A pending order is confirmed; a
    /// cancelled one now owes a full refund and is flagged for an operator.
    pub fn complete_payment(order: &Order, transaction_id: Option<&str>) -> Result<Order> {
        if !matches!(order.payment.status, PaymentStatus::Pending | PaymentStatus::Processing) {
            return Err(CommerceError::invalid_transition(
                format!("payment {}", order.payment.status),
                PaymentStatus::Completed,
            ));
        }

        let mut next = order.clone();
        record_payment_completed(&mut next, transaction_id);

        match next.status {
            OrderStatus::Pending => apply_status(&mut next, OrderStatus::Confirmed, "Payment completed", None),
            OrderStatus::Cancelled => {
                if let Some(cancellation) = next.cancellation.as_mut() {
                    cancellation.refund_status = RefundStatus::Full;
                }
                append_timeline(&mut next, "Payment completed after cancellation", None);
                flag(&mut next, "payment captured on a cancelled order; refund required");
            }
            _ => append_timeline(&mut next, "Payment completed", None),
        }
        Ok(next)
    }

    /// Marks a gateway payment failed. The order status is left alone so the
    /// customer can retry.
    pub fn fail_payment(order: &Order, transaction_id: Option<&str>, reason: &str) -> Result<Order> {
        if !matches!(order.payment.status, PaymentStatus::Pending | PaymentStatus::Processing) {
            return Err(CommerceError::invalid_transition(
                format!("payment {}", order.payment.status),
                PaymentStatus::Failed,
            ));
        }

        let mut next = order.clone();
        next.payment.status = PaymentStatus::Failed;
        next.payment.failure_reason = Some(reason.to_string());
        if let Some(txn) = transaction_id {
            next.payment.provider_transaction_id = Some(txn.to_string());
        }
        append_timeline(&mut next, &format!("Payment failed: {reason}"), None);
        next.raise_event(DomainEvent::Payment(PaymentChange::Failed { order_id: next.id, reason: reason.to_string() }));
        Ok(next)
    }

    /// Records a provider-originated refund of a completed payment.
    pub fn refund_payment(order: &Order) -> Result<Order> {
        if order.payment.status != PaymentStatus::Completed {
            return Err(CommerceError::invalid_transition(
                format!("payment {}", order.payment.status),
                PaymentStatus::Refunded,
            ));
        }

        let mut next = order.clone();
        next.payment.status = PaymentStatus::Refunded;
        next.payment.refunded_at = Some(Utc::now());
        if let Some(cancellation) = next.cancellation.as_mut() {
            cancellation.refund_status = RefundStatus::Processed;
        }
        next.raise_event(DomainEvent::Payment(PaymentChange::Refunded { order_id: next.id, amount: next.total }));

        if Self::is_valid_edge(next.status, OrderStatus::Refunded) {
            apply_status(&mut next, OrderStatus::Refunded, "Payment refunded", None);
        } else {
            append_timeline(&mut next, "Payment refunded", None);
        }
        Ok(next)
    }

    /// Records cash collected by the courier for a delivered COD order.
    pub fn collect_cash(order: &Order, transaction_id: Option<&str>) -> Result<Order> {
        if order.payment.method != PaymentMethod::Cod {
            return Err(CommerceError::invalid_transition(format!("{} payment", order.payment.method), "cash collected"));
        }
        if order.status != OrderStatus::Delivered {
            return Err(CommerceError::invalid_transition(order.status, "cash collected"));
        }
        if order.payment.status != PaymentStatus::Pending {
            return Err(CommerceError::invalid_transition(
                format!("payment {}", order.payment.status),
                PaymentStatus::Completed,
            ));
        }

        let mut next = order.clone();
        record_payment_completed(&mut next, transaction_id);
        append_timeline(&mut next, "Cash collected on delivery", None);
        Ok(next)
    }

    /// Flags the order for manual review. An order already flagged keeps its
    /// first reason.
    pub fn flag_for_review(order: &Order, reason: &str) -> Order {
        let mut next = order.clone();
        if next.review.is_none() {
            flag(&mut next, reason);
        }
        next
    }
}

fn apply_status(order: &mut Order, target: OrderStatus, message: &str, actor: Option<&str>) {
    let from = order.status;
    order.status = target;
    let now = Utc::now();
    match target {
        OrderStatus::Shipped if order.tracking.shipped_at.is_none() => order.tracking.shipped_at = Some(now),
        OrderStatus::Delivered if order.tracking.delivered_at.is_none() => order.tracking.delivered_at = Some(now),
        _ => {}
    }
    append_timeline(order, message, actor);
    order.raise_event(DomainEvent::Order(OrderEvent::StatusChanged {
        order_id: order.id,
        from,
        to: target,
        message: message.to_string(),
    }));
}

fn append_timeline(order: &mut Order, message: &str, actor: Option<&str>) {
    order.timeline.push(TimelineEntry {
        status: order.status,
        message: message.to_string(),
        timestamp: Utc::now(),
        actor: actor.map(str::to_string),
    });
    order.touch();
}

fn record_payment_completed(order: &mut Order, transaction_id: Option<&str>) {
    order.payment.status = PaymentStatus::Completed;
    order.payment.paid_at = Some(Utc::now());
    order.payment.failure_reason = None;
    if let Some(txn) = transaction_id {
        order.payment.provider_transaction_id = Some(txn.to_string());
    }
    let amount: Decimal = order.total;
    order.raise_event(DomainEvent::Payment(PaymentChange::Completed { order_id: order.id, amount }));
}

fn flag(order: &mut Order, reason: &str) {
    order.review = Some(ReviewFlag { reason: reason.to_string(), flagged_at: Utc::now() });
    append_timeline(order, &format!("Flagged for review: {reason}"), None);
    order.raise_event(DomainEvent::Order(OrderEvent::FlaggedForReview { order_id: order.id, reason: reason.to_string() }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::fixtures::placed_order;

    fn paid_order() -> Order {
        let order = placed_order(PaymentMethod::Card);
        let order = OrderStateMachine::initiate_payment(&order, "gw_order_1").unwrap();
        OrderStateMachine::complete_payment(&order, Some("pay_1")).unwrap()
    }

    fn advance(order: &Order, path: &[OrderStatus]) -> Order {
        path.iter().fold(order.clone(), |o, s| OrderStateMachine::transition(&o, *s, "step", Some("admin")).unwrap())
    }

    #[test]
    fn test_happy_path_appends_timeline() {
        let mut order = advance(&paid_order(), &[OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered]);
        assert_eq!(order.status(), OrderStatus::Delivered);
        assert!(order.tracking().shipped_at.is_some());
        assert!(order.tracking().delivered_at.is_some());
        let statuses: Vec<_> = order.timeline().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![OrderStatus::Pending, OrderStatus::Confirmed, OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered]
        );
        let changes = order
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, DomainEvent::Order(OrderEvent::StatusChanged { .. })))
            .count();
        assert_eq!(changes, 4);
    }

    #[test]
    fn test_invalid_edges_rejected() {
        let order = placed_order(PaymentMethod::Card);
        assert!(matches!(
            OrderStateMachine::transition(&order, OrderStatus::Shipped, "skip", None),
            Err(CommerceError::InvalidTransition { .. })
        ));
        let delivered = advance(&paid_order(), &[OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered]);
        assert!(OrderStateMachine::transition(&delivered, OrderStatus::Processing, "back", None).is_err());
    }

    #[test]
    fn test_unpaid_gateway_order_cannot_be_confirmed_by_hand() {
        for method in [PaymentMethod::Card, PaymentMethod::Wallet] {
            let order = OrderStateMachine::initiate_payment(&placed_order(method), "gw").unwrap();
            assert!(matches!(
                OrderStateMachine::transition(&order, OrderStatus::Confirmed, "manual", Some("admin")),
                Err(CommerceError::InvalidTransition { .. })
            ));
            assert!(OrderStateMachine::ensure_payment_initiable(&order).is_ok());
        }
        let cod = OrderStateMachine::transition(&placed_order(PaymentMethod::Cod), OrderStatus::Confirmed, "cod", None).unwrap();
        assert_eq!(cod.status(), OrderStatus::Confirmed);
    }

    #[test]
    fn test_repeated_target_is_noop() {
        let shipped = advance(&paid_order(), &[OrderStatus::Processing, OrderStatus::Shipped]);
        let shipped_at = shipped.tracking().shipped_at;
        let again = OrderStateMachine::transition(&shipped, OrderStatus::Shipped, "again", None).unwrap();
        assert_eq!(again.timeline().len(), shipped.timeline().len());
        assert_eq!(again.tracking().shipped_at, shipped_at);
    }

    #[test]
    fn test_cancel_only_from_pending_or_confirmed() {
        for status in [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered] {
            let path: Vec<_> = [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered]
                .into_iter()
                .take_while(|s| *s != status)
                .chain(std::iter::once(status))
                .collect();
            let order = advance(&paid_order(), &path);
            assert!(matches!(
                OrderStateMachine::cancel(&order, "too late", None),
                Err(CommerceError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn test_cancel_records_refund_status() {
        let unpaid = OrderStateMachine::cancel(&placed_order(PaymentMethod::Card), "changed mind", Some("cust-1")).unwrap();
        let c = unpaid.cancellation().unwrap();
        assert_eq!(c.refund_status, RefundStatus::None);
        assert_eq!(c.cancelled_by.as_deref(), Some("cust-1"));
        assert_eq!(unpaid.status(), OrderStatus::Cancelled);

        let paid = OrderStateMachine::cancel(&paid_order(), "duplicate order", None).unwrap();
        assert_eq!(paid.cancellation().unwrap().refund_status, RefundStatus::Full);
    }

    #[test]
    fn test_payment_completion_confirms_once() {
        let order = paid_order();
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.payment().status, PaymentStatus::Completed);
        assert_eq!(order.payment().provider_transaction_id.as_deref(), Some("pay_1"));
        assert!(OrderStateMachine::complete_payment(&order, Some("pay_1")).is_err());
    }

    #[test]
    fn test_failed_payment_keeps_order_status() {
        let order = OrderStateMachine::initiate_payment(&placed_order(PaymentMethod::Wallet), "w_1").unwrap();
        let failed = OrderStateMachine::fail_payment(&order, Some("pay_x"), "insufficient funds").unwrap();
        assert_eq!(failed.status(), OrderStatus::Pending);
        assert_eq!(failed.payment().status, PaymentStatus::Failed);
        assert_eq!(failed.timeline().last().unwrap().message, "Payment failed: insufficient funds");
        let retried = OrderStateMachine::initiate_payment(&failed, "w_2").unwrap();
        assert_eq!(retried.payment().status, PaymentStatus::Processing);
    }

    #[test]
    fn test_capture_after_cancel_is_flagged() {
        let order = OrderStateMachine::initiate_payment(&placed_order(PaymentMethod::Card), "gw").unwrap();
        let cancelled = OrderStateMachine::cancel(&order, "changed mind", None).unwrap();
        let paid = OrderStateMachine::complete_payment(&cancelled, Some("pay")).unwrap();
        assert_eq!(paid.status(), OrderStatus::Cancelled);
        assert_eq!(paid.cancellation().unwrap().refund_status, RefundStatus::Full);
        assert!(paid.review().is_some());
    }

    #[test]
    fn test_refund() {
        let refunded = OrderStateMachine::refund_payment(&paid_order()).unwrap();
        assert_eq!(refunded.status(), OrderStatus::Refunded);
        assert_eq!(refunded.payment().status, PaymentStatus::Refunded);
        assert!(refunded.payment().refunded_at.is_some());
        assert!(OrderStateMachine::refund_payment(&refunded).is_err());
        assert!(OrderStateMachine::transition(&placed_order(PaymentMethod::Card), OrderStatus::Refunded, "x", None).is_err());
    }

    #[test]
    fn test_cod_cash_collection() {
        let order = OrderStateMachine::transition(&placed_order(PaymentMethod::Cod), OrderStatus::Confirmed, "cod", None).unwrap();
        assert!(OrderStateMachine::collect_cash(&order, None).is_err());
        let delivered = advance(&order, &[OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered]);
        assert_eq!(delivered.payment().status, PaymentStatus::Pending);
        let collected = OrderStateMachine::collect_cash(&delivered, Some("courier-7")).unwrap();
        assert_eq!(collected.payment().status, PaymentStatus::Completed);
        assert_eq!(collected.status(), OrderStatus::Delivered);
        assert!(OrderStateMachine::initiate_payment(&placed_order(PaymentMethod::Cod), "x").is_err());
    }
}
