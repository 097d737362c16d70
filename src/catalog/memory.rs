//! In-memory catalog backed by fixture products

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::CatalogRepository;
use crate::domain::aggregates::{BulkDiscountTier, FinishingOption, PaperOption, ProductConfig, SizeOption};
use crate::Result;

#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    products: HashMap<String, ProductConfig>,
}

impl InMemoryCatalog {
    pub fn new(products: impl IntoIterator<Item = ProductConfig>) -> Self {
        Self { products: products.into_iter().map(|p| (p.id.clone(), p)).collect() }
    }

    /// Catalog used when no database is configured.
    pub fn with_fixtures() -> Self {
        Self::new(fixture_products())
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalog {
    async fn get_product(&self, id: &str) -> Result<Option<ProductConfig>> {
        Ok(self.products.get(id).cloned())
    }
}

fn size(id: &str, multiplier: Decimal) -> SizeOption { SizeOption { id: id.into(), price_multiplier: multiplier } }
fn paper(id: &str, multiplier: Decimal) -> PaperOption { PaperOption { id: id.into(), price_multiplier: multiplier } }
fn finishing(id: &str, fee: Decimal) -> FinishingOption { FinishingOption { id: id.into(), flat_fee: fee } }
fn tier(min_quantity: u32, percent: i64) -> BulkDiscountTier { BulkDiscountTier { min_quantity, discount_percent: Decimal::from(percent) } }

pub fn fixture_products() -> Vec<ProductConfig> {
    vec![
        ProductConfig {
            id: "business-cards".into(),
            name: "Business Cards".into(),
            base_price: Decimal::new(25, 1),
            min_quantity: 100,
            sizes: vec![size("standard", Decimal::ONE), size("square", Decimal::new(12, 1))],
            paper_types: vec![paper("matte", Decimal::ONE), paper("glossy", Decimal::new(11, 1)), paper("premium", Decimal::new(15, 1))],
            finishings: vec![finishing("none", Decimal::ZERO), finishing("rounded-corners", Decimal::from(150)), finishing("spot-uv", Decimal::from(400))],
            bulk_discounts: vec![tier(500, 10), tier(1000, 15), tier(5000, 20)],
            has_color: true,
            has_double_side: true,
            has_lamination: true,
            has_urgent_delivery: true,
        },
        ProductConfig {
            id: "flyers".into(),
            name: "Flyers".into(),
            base_price: Decimal::new(40, 1),
            min_quantity: 50,
            sizes: vec![size("a5", Decimal::ONE), size("a4", Decimal::new(18, 1))],
            paper_types: vec![paper("standard", Decimal::ONE), paper("art-paper", Decimal::new(13, 1))],
            finishings: vec![finishing("none", Decimal::ZERO), finishing("folding", Decimal::from(200))],
            bulk_discounts: vec![tier(250, 5), tier(1000, 12)],
            has_color: true,
            has_double_side: true,
            has_lamination: false,
            has_urgent_delivery: true,
        },
        ProductConfig {
            id: "stickers".into(),
            name: "Die-cut Stickers".into(),
            base_price: Decimal::new(60, 1),
            min_quantity: 25,
            sizes: vec![size("small", Decimal::ONE), size("medium", Decimal::new(15, 1)), size("large", Decimal::new(22, 1))],
            paper_types: vec![paper("vinyl", Decimal::ONE), paper("transparent", Decimal::new(125, 2))],
            finishings: vec![],
            bulk_discounts: vec![tier(100, 10), tier(500, 20)],
            has_color: false,
            has_double_side: false,
            has_lamination: true,
            has_urgent_delivery: false,
        },
    ]
}
