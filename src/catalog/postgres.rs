//! PostgreSQL catalog

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

use super::CatalogRepository;
use crate::domain::aggregates::ProductConfig;
use crate::Result;

#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogRepository for PgCatalog {
    async fn get_product(&self, id: &str) -> Result<Option<ProductConfig>> {
        let row: Option<(Json<ProductConfig>,)> = sqlx::query_as("SELECT config FROM product_configs WHERE id = $1 AND active")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some((Json(product),)) => {
                product.validate()?;
                Ok(Some(product))
            }
            None => Ok(None),
        }
    }
}
