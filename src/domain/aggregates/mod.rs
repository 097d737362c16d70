//! Aggregates module
pub mod order;
pub mod product;

pub use order::{
    Cancellation, NewOrder, Order, OrderItem, OrderPolicy, OrderStatus, PaymentMethod, PaymentState,
    PaymentStatus, RefundStatus, ReviewFlag, TimelineEntry, Tracking,
};
pub use product::{BulkDiscountTier, Customization, FinishingOption, Lamination, PaperOption, ProductConfig, SizeOption};
