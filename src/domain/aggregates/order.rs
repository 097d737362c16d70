//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::aggregates::product::Customization;
use crate::domain::events::DomainEvent;
use crate::domain::services::pricing::PriceBreakdown;
use crate::domain::value_objects::{round_money, OrderNumber};

/// An order and everything that has happened to it.
///
/// Fields are crate-visible so the state machine and stores can build the
/// next value; everything outside the crate reads through the getters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub(crate) id: Uuid,
    pub(crate) order_number: OrderNumber,
    pub(crate) customer_id: Option<String>,
    pub(crate) email: String,
    pub(crate) currency: String,
    pub(crate) items: Vec<OrderItem>,
    pub(crate) subtotal: Decimal,
    pub(crate) tax: Decimal,
    pub(crate) shipping: Decimal,
    pub(crate) discount: Decimal,
    pub(crate) total: Decimal,
    pub(crate) shipping_address: serde_json::Value,
    pub(crate) status: OrderStatus,
    pub(crate) payment: PaymentState,
    pub(crate) timeline: Vec<TimelineEntry>,
    pub(crate) tracking: Tracking,
    pub(crate) cancellation: Option<Cancellation>,
    pub(crate) review: Option<ReviewFlag>,
    pub(crate) version: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    pub customization: Customization,
    pub price: PriceBreakdown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Confirmed, Processing, Shipped, Delivered, Cancelled, Refunded }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus { #[default] Pending, Processing, Completed, Failed, Refunded }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod { Card, Wallet, Cod }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentState {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub provider_correlation_id: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub status: OrderStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub actor: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tracking {
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
    pub cancelled_by: Option<String>,
    pub refund_status: RefundStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus { None, Full, Processed }

/// Set when an order needs an operator to look at it before anything else happens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFlag { pub reason: String, pub flagged_at: DateTime<Utc> }

/// Tax and shipping rules applied once, when the order is placed.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderPolicy {
    pub currency: String,
    pub tax_rate_percent: Decimal,
    pub shipping_flat_fee: Decimal,
    pub free_shipping_threshold: Decimal,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            tax_rate_percent: Decimal::new(18, 0),
            shipping_flat_fee: Decimal::new(50, 0),
            free_shipping_threshold: Decimal::new(500, 0),
        }
    }
}

/// Everything needed to build a new order value.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub order_number: OrderNumber,
    pub customer_id: Option<String>,
    pub email: String,
    pub method: PaymentMethod,
    pub items: Vec<OrderItem>,
    pub shipping_address: serde_json::Value,
}

impl Order {
    /// Builds a pending order with totals derived from the frozen item prices.
    /// Totals are never recomputed after this point.
    pub fn place(new: NewOrder, policy: &OrderPolicy) -> Self {
        let now = Utc::now();
        let subtotal: Decimal = new.items.iter().map(|i| i.price.pre_discount_total()).sum();
        let discount: Decimal = new.items.iter().map(|i| i.price.bulk_discount).sum();
        let taxable = subtotal - discount;
        let tax = round_money(taxable * policy.tax_rate_percent / Decimal::ONE_HUNDRED);
        let shipping = if taxable >= policy.free_shipping_threshold { Decimal::ZERO } else { policy.shipping_flat_fee };
        let total = taxable + tax + shipping;

        let correlation = match new.method {
            PaymentMethod::Cod => Some(new.order_number.to_string()),
            PaymentMethod::Card | PaymentMethod::Wallet => None,
        };

        Self {
            id: Uuid::now_v7(),
            order_number: new.order_number,
            customer_id: new.customer_id.clone(),
            email: new.email,
            currency: policy.currency.clone(),
            items: new.items,
            subtotal, tax, shipping, discount, total,
            shipping_address: new.shipping_address,
            status: OrderStatus::Pending,
            payment: PaymentState {
                method: new.method,
                status: PaymentStatus::Pending,
                provider_correlation_id: correlation,
                provider_transaction_id: None,
                failure_reason: None,
                paid_at: None,
                refunded_at: None,
            },
            timeline: vec![TimelineEntry { status: OrderStatus::Pending, message: "Order placed".into(), timestamp: now, actor: new.customer_id }],
            tracking: Tracking::default(),
            cancellation: None,
            review: None,
            version: 0,
            created_at: now,
            updated_at: now,
            events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &OrderNumber { &self.order_number }
    pub fn customer_id(&self) -> Option<&str> { self.customer_id.as_deref() }
    pub fn email(&self) -> &str { &self.email }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn subtotal(&self) -> Decimal { self.subtotal }
    pub fn tax(&self) -> Decimal { self.tax }
    pub fn shipping(&self) -> Decimal { self.shipping }
    pub fn discount(&self) -> Decimal { self.discount }
    pub fn total(&self) -> Decimal { self.total }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment(&self) -> &PaymentState { &self.payment }
    pub fn timeline(&self) -> &[TimelineEntry] { &self.timeline }
    pub fn tracking(&self) -> &Tracking { &self.tracking }
    pub fn cancellation(&self) -> Option<&Cancellation> { self.cancellation.as_ref() }
    pub fn review(&self) -> Option<&ReviewFlag> { self.review.as_ref() }
    pub fn version(&self) -> u64 { self.version }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    pub(crate) fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    pub(crate) fn touch(&mut self) { self.updated_at = Utc::now(); }
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Card => "card", Self::Wallet => "wallet", Self::Cod => "cod" }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::domain::aggregates::product::fixtures::{business_cards, customization};
    use crate::domain::services::pricing::PricingEngine;

    pub fn placed_order(method: PaymentMethod) -> Order {
        let product = business_cards();
        let c = customization(500);
        let price = PricingEngine::default().compute(&product, &c).unwrap();
        let items = vec![OrderItem { product_id: product.id.clone(), product_name: product.name.clone(), customization: c, price }];
        Order::place(
            NewOrder {
                order_number: OrderNumber::from_sequence(1),
                customer_id: Some("cust-1".into()),
                email: "buyer@example.com".into(),
                method,
                items,
                shipping_address: serde_json::json!({"city": "Pune"}),
            },
            &OrderPolicy::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::placed_order;
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_place_derives_totals() {
        let order = placed_order(PaymentMethod::Card);
        // 500 cards at 2.50: subtotal 1250, 10% bulk discount 125
        assert_eq!(order.subtotal(), dec!(1250));
        assert_eq!(order.discount(), dec!(125));
        assert_eq!(order.tax(), dec!(202.50));
        assert_eq!(order.shipping(), dec!(0));
        assert_eq!(order.total(), dec!(1327.50));
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.payment().status, PaymentStatus::Pending);
        assert_eq!(order.timeline().len(), 1);
        assert_eq!(order.payment().provider_correlation_id, None);
    }

    #[test]
    fn test_cod_order_correlates_by_number() {
        let order = placed_order(PaymentMethod::Cod);
        assert_eq!(order.payment().provider_correlation_id.as_deref(), Some("ORD000001"));
    }

    #[test]
    fn test_serde_skips_events() {
        let order = placed_order(PaymentMethod::Wallet);
        let json = serde_json::to_value(&order).unwrap();
        assert!(json.get("events").is_none());
        assert_eq!(json["orderNumber"], "ORD000001");
        let back: Order = serde_json::from_value(json).unwrap();
        assert_eq!(back.total(), order.total());
    }
}
