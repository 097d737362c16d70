//! Domain layer: aggregates, value objects, events and domain services
pub mod aggregates;
pub mod events;
pub mod services;
pub mod value_objects;
