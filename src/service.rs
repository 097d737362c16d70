//! Order service
//!
//! Use cases behind the HTTP surface: quoting, placing orders, starting and
//! confirming payments, and operator status changes. Every order write is a
//! compare-and-swap retried against a fresh read.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::catalog::CatalogRepository;
use crate::domain::aggregates::{
    Customization, NewOrder, Order, OrderItem, OrderPolicy, OrderStatus, PaymentMethod, PaymentStatus, ProductConfig,
};
use crate::domain::services::{OrderStateMachine, PriceBreakdown, PricingEngine, INITIABLE_PAYMENT};
use crate::domain::value_objects::OrderNumber;
use crate::gateway::PaymentProviderClient;
use crate::notify::{dispatch, Notifier};
use crate::reconciler::{PaymentReconciler, ReconcileOutcome};
use crate::store::{OrderSequence, OrderStore};
use crate::{CommerceError, Result};

const MAX_CAS_ATTEMPTS: usize = 5;

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    #[validate(length(min = 1))]
    pub product_id: String,
    pub customization: Customization,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    #[validate(length(min = 1))]
    pub product_id: String,
    #[validate]
    pub customization: Customization,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub customer_id: Option<String>,
    #[validate(email)]
    pub email: String,
    pub payment_method: PaymentMethod,
    #[validate(length(min = 1))]
    pub items: Vec<OrderItemRequest>,
    pub shipping_address: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
    pub message: String,
    pub actor: Option<String>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    #[validate(length(min = 1))]
    pub reason: String,
    pub cancelled_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    pub provider_correlation_id: String,
}

/// Result of a client-side payment confirmation.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PaymentConfirmation {
    /// The gateway has nothing final yet; the webhook will settle it.
    Pending,
    Settled { order: Order },
}

// =============================================================================
// Service
// =============================================================================

pub struct OrderService {
    catalog: Arc<dyn CatalogRepository>,
    store: Arc<dyn OrderStore>,
    sequence: Arc<dyn OrderSequence>,
    notifier: Arc<dyn Notifier>,
    reconciler: Arc<PaymentReconciler>,
    providers: HashMap<PaymentMethod, Arc<dyn PaymentProviderClient>>,
    pricing: PricingEngine,
    policy: OrderPolicy,
}

impl OrderService {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        store: Arc<dyn OrderStore>,
        sequence: Arc<dyn OrderSequence>,
        notifier: Arc<dyn Notifier>,
        pricing: PricingEngine,
        policy: OrderPolicy,
    ) -> Self {
        let reconciler = Arc::new(PaymentReconciler::new(store.clone(), notifier.clone()));
        Self { catalog, store, sequence, notifier, reconciler, providers: HashMap::new(), pricing, policy }
    }

    pub fn with_provider(mut self, method: PaymentMethod, client: Arc<dyn PaymentProviderClient>) -> Self {
        self.providers.insert(method, client);
        self
    }

    pub fn reconciler(&self) -> &PaymentReconciler {
        &self.reconciler
    }

    async fn product(&self, id: &str) -> Result<ProductConfig> {
        self.catalog.get_product(id).await?.ok_or(CommerceError::ProductNotFound)
    }

    pub async fn quote(&self, request: &QuoteRequest) -> Result<PriceBreakdown> {
        request.validate()?;
        let product = self.product(&request.product_id).await?;
        self.pricing.compute(&product, &request.customization)
    }

    pub async fn place_order(&self, request: PlaceOrderRequest) -> Result<Order> {
        request.validate()?;

        let mut items = Vec::with_capacity(request.items.len());
        for item in request.items {
            item.validate()?;
            let product = self.product(&item.product_id).await?;
            let price = self.pricing.compute(&product, &item.customization)?;
            items.push(OrderItem {
                product_id: product.id,
                product_name: product.name,
                customization: item.customization,
                price,
            });
        }

        let order_number = OrderNumber::from_sequence(self.sequence.next_value().await?);
        let mut order = Order::place(
            NewOrder {
                order_number,
                customer_id: request.customer_id,
                email: request.email,
                method: request.payment_method,
                items,
                shipping_address: request.shipping_address,
            },
            &self.policy,
        );
        if order.payment().method == PaymentMethod::Cod {
            order = OrderStateMachine::transition(&order, OrderStatus::Confirmed, "Cash on delivery order confirmed", None)?;
        }

        self.store.insert(&order).await?;
        tracing::info!(order_id = %order.id(), order_number = %order.order_number(), total = %order.total(), method = %order.payment().method, "Order placed");

        let events = order.take_events();
        dispatch(self.notifier.as_ref(), &order, events).await;
        Ok(order)
    }

    pub async fn get(&self, id: Uuid) -> Result<Order> {
        self.store.get(id).await?.ok_or(CommerceError::OrderNotFound)
    }

    pub async fn get_by_number(&self, number: &str) -> Result<Order> {
        let number = OrderNumber::parse(number).map_err(|_| CommerceError::OrderNotFound)?;
        self.store.get_by_number(&number).await?.ok_or(CommerceError::OrderNotFound)
    }

    /// Opens a gateway payment for the order total and records its
    /// correlation id. The gateway is only called once the order is known to
    /// accept a payment.
    pub async fn initiate_payment(&self, order_id: Uuid) -> Result<Order> {
        let order = self.get(order_id).await?;
        OrderStateMachine::ensure_payment_initiable(&order)?;
        let provider = self.provider(order.payment().method)?;

        let correlation_id = provider.create_payment(&order).await?;
        tracing::info!(%order_id, %correlation_id, provider = %order.payment().method, "Gateway payment created");

        self.update(order_id, Some(INITIABLE_PAYMENT), |o| OrderStateMachine::initiate_payment(o, &correlation_id)).await
    }

    /// Settles a payment the customer's browser reports as done. The browser
    /// is not trusted: the gateway is asked for the payment's state and that
    /// answer goes through the same reconciliation as a webhook.
    pub async fn confirm_payment(&self, user_id: &str, request: &ConfirmPaymentRequest) -> Result<PaymentConfirmation> {
        let correlation_id = request.provider_correlation_id.as_str();
        let Some(order) = self.store.find_by_correlation_id(correlation_id).await? else {
            tracing::warn!(correlation_id, user_id, "Payment confirmation for unknown correlation id");
            return Err(CommerceError::OrderNotFound);
        };
        if order.customer_id() != Some(user_id) {
            tracing::warn!(order_id = %order.id(), user_id, "Payment confirmation for another customer's order");
            return Err(CommerceError::OrderNotFound);
        }
        let provider = self.provider(order.payment().method)?;

        let Some(event) = provider.fetch_payment(correlation_id).await? else {
            tracing::debug!(order_id = %order.id(), %correlation_id, "Gateway has no final payment state yet");
            return Ok(PaymentConfirmation::Pending);
        };
        let outcome = self.reconciler.reconcile(&event).await?;
        tracing::info!(order_id = %order.id(), ?outcome, "Payment confirmed by client");

        Ok(PaymentConfirmation::Settled { order: self.get(order.id()).await? })
    }

    /// Operator status change. Shipping may carry tracking details.
    pub async fn transition_status(&self, order_id: Uuid, request: StatusUpdateRequest) -> Result<Order> {
        let actor = request.actor.as_deref();
        self.update(order_id, None, |order| match request.status {
            OrderStatus::Shipped => {
                OrderStateMachine::ship(order, request.tracking_number.as_deref(), request.carrier.as_deref(), actor)
            }
            target => OrderStateMachine::transition(order, target, &request.message, actor),
        })
        .await
    }

    pub async fn cancel(&self, order_id: Uuid, request: CancelRequest) -> Result<Order> {
        request.validate()?;
        self.update(order_id, None, |order| OrderStateMachine::cancel(order, &request.reason, request.cancelled_by.as_deref()))
            .await
    }

    pub async fn reconcile(&self, event: &crate::gateway::PaymentEvent) -> Result<ReconcileOutcome> {
        self.reconciler.reconcile(event).await
    }

    fn provider(&self, method: PaymentMethod) -> Result<&Arc<dyn PaymentProviderClient>> {
        self.providers
            .get(&method)
            .ok_or_else(|| CommerceError::PaymentNotInitiable(format!("no gateway configured for {method}")))
    }

    /// Read, apply, compare-and-swap; on a lost race start over from a fresh
    /// read so `apply` always sees the latest order.
    async fn update<F>(&self, order_id: Uuid, payment_status_in: Option<&[PaymentStatus]>, apply: F) -> Result<Order>
    where
        F: Fn(&Order) -> Result<Order>,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let order = self.get(order_id).await?;
            let mut next = apply(&order)?;
            if self.store.compare_and_swap(&next, payment_status_in).await? {
                let events = next.take_events();
                dispatch(self.notifier.as_ref(), &next, events).await;
                return self.get(order_id).await;
            }
            tracing::debug!(%order_id, "Order changed underneath update, retrying");
        }
        Err(CommerceError::Conflict)
    }
}
