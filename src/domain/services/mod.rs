//! Domain services
pub mod pricing;
pub mod state_machine;

pub use pricing::{PriceBreakdown, PricingEngine};
pub use state_machine::{OrderStateMachine, INITIABLE_PAYMENT};
