//! Product catalog access
//!
//! The catalog itself is managed elsewhere; pricing only reads product
//! configurations from it. Which backend is used is decided once at startup.

use async_trait::async_trait;

use crate::domain::aggregates::ProductConfig;
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryCatalog;
pub use postgres::PgCatalog;

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn get_product(&self, id: &str) -> Result<Option<ProductConfig>>;
}
