//! Print storefront commerce core
//!
//! Order pricing and payment reconciliation for custom print products.
//!
//! ## Features
//! - Deterministic decimal pricing of product customizations
//! - Order status state machine with an append-only timeline
//! - HMAC-verified payment gateway webhooks (card, wallet, cash on delivery)
//! - Idempotent payment reconciliation backed by compare-and-swap writes
//! - Fire-and-forget order notifications over NATS

use rust_decimal::Decimal;
use thiserror::Error;

pub mod api;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod notify;
pub mod reconciler;
pub mod service;
pub mod store;

pub use domain::aggregates::{
    Customization, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, ProductConfig,
};
pub use domain::services::{OrderStateMachine, PriceBreakdown, PricingEngine};
pub use reconciler::{PaymentReconciler, ReconcileOutcome};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("Invalid customization: {0}")]
    InvalidCustomization(String),

    #[error("Quantity {requested} is below the minimum of {minimum}")]
    QuantityTooLow { minimum: u32, requested: u32 },

    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Webhook signature invalid")]
    SignatureInvalid,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Amount mismatch: expected {expected} minor units, received {received}")]
    AmountMismatch { expected: i64, received: i64 },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Order not found")]
    OrderNotFound,

    #[error("Product not found")]
    ProductNotFound,

    #[error("Payment cannot be initiated: {0}")]
    PaymentNotInitiable(String),

    #[error("Concurrent update conflict")]
    Conflict,

    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification error: {0}")]
    Notification(String),
}

impl From<sqlx::Error> for CommerceError {
    fn from(e: sqlx::Error) -> Self {
        CommerceError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CommerceError {
    fn from(e: serde_json::Error) -> Self {
        CommerceError::MalformedPayload(e.to_string())
    }
}

impl From<reqwest::Error> for CommerceError {
    fn from(e: reqwest::Error) -> Self {
        CommerceError::Provider(e.to_string())
    }
}

impl CommerceError {
    pub(crate) fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        CommerceError::InvalidTransition { from: from.to_string(), to: to.to_string() }
    }

    pub(crate) fn amount_mismatch(expected: Decimal, received: i64) -> Self {
        CommerceError::AmountMismatch {
            expected: domain::value_objects::to_minor_units(expected),
            received,
        }
    }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
