//! Product configuration and customer customization

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{CommerceError, Result};

/// Catalog entry describing what a print product can be configured with.
///
/// Captured read-only at pricing time. Later catalog edits never touch the
/// breakdowns already frozen on placed orders.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductConfig {
    pub id: String,
    pub name: String,
    pub base_price: Decimal,
    pub min_quantity: u32,
    #[serde(default)]
    pub sizes: Vec<SizeOption>,
    #[serde(default)]
    pub paper_types: Vec<PaperOption>,
    #[serde(default)]
    pub finishings: Vec<FinishingOption>,
    #[serde(default)]
    pub bulk_discounts: Vec<BulkDiscountTier>,
    #[serde(default)]
    pub has_color: bool,
    #[serde(default)]
    pub has_double_side: bool,
    #[serde(default)]
    pub has_lamination: bool,
    #[serde(default)]
    pub has_urgent_delivery: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeOption { pub id: String, pub price_multiplier: Decimal }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperOption { pub id: String, pub price_multiplier: Decimal }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishingOption { pub id: String, pub flat_fee: Decimal }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDiscountTier { pub min_quantity: u32, pub discount_percent: Decimal }

impl ProductConfig {
    /// Checks the catalog entry itself is priceable: non-negative prices,
    /// discounts within 0..=100 and distinct tier thresholds.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(CommerceError::InvalidCustomization(format!("product {}: {msg}", self.id)));
        if self.base_price.is_sign_negative() {
            return invalid("negative base price".into());
        }
        if self.sizes.iter().any(|s| s.price_multiplier.is_sign_negative())
            || self.paper_types.iter().any(|p| p.price_multiplier.is_sign_negative())
        {
            return invalid("negative price multiplier".into());
        }
        if self.finishings.iter().any(|f| f.flat_fee.is_sign_negative()) {
            return invalid("negative finishing fee".into());
        }
        let mut thresholds: Vec<u32> = self.bulk_discounts.iter().map(|t| t.min_quantity).collect();
        thresholds.sort_unstable();
        if thresholds.windows(2).any(|w| w[0] == w[1]) {
            return invalid("duplicate bulk discount threshold".into());
        }
        if self.bulk_discounts.iter().any(|t| t.discount_percent.is_sign_negative() || t.discount_percent > Decimal::ONE_HUNDRED) {
            return invalid("bulk discount outside 0..=100 percent".into());
        }
        Ok(())
    }

    pub fn size(&self, id: &str) -> Option<&SizeOption> { self.sizes.iter().find(|s| s.id == id) }
    pub fn paper_type(&self, id: &str) -> Option<&PaperOption> { self.paper_types.iter().find(|p| p.id == id) }
    pub fn finishing(&self, id: &str) -> Option<&FinishingOption> { self.finishings.iter().find(|f| f.id == id) }
}

/// Lamination choice. Anything other than `none` is a laminated finish.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Lamination {
    #[default]
    None,
    Finish(String),
}

impl Lamination {
    pub fn is_none(&self) -> bool { matches!(self, Lamination::None) }
}

impl From<String> for Lamination {
    fn from(value: String) -> Self {
        if value.trim().is_empty() || value.eq_ignore_ascii_case("none") { Lamination::None } else { Lamination::Finish(value) }
    }
}

impl From<Lamination> for String {
    fn from(value: Lamination) -> Self {
        match value { Lamination::None => "none".to_string(), Lamination::Finish(kind) => kind }
    }
}

/// What the customer picked for one line item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Customization {
    pub size_id: Option<String>,
    pub paper_type_id: Option<String>,
    pub finishing_id: Option<String>,
    #[validate(range(min = 1))]
    pub quantity: u32,
    #[serde(default)]
    pub is_color: bool,
    #[serde(default)]
    pub is_double_side: bool,
    #[serde(default)]
    pub lamination: Lamination,
    #[serde(default)]
    pub is_urgent: bool,
}

/// Selected options resolved against the catalog.
#[derive(Debug)]
pub(crate) struct ResolvedOptions {
    pub size_multiplier: Decimal,
    pub paper_multiplier: Decimal,
    pub finishing_fee: Decimal,
}

impl Customization {
    /// Validates the customization against the product, resolving the selected
    /// option ids. An option may be omitted only when the product offers none.
    pub(crate) fn resolve(&self, product: &ProductConfig) -> Result<ResolvedOptions> {
        Validate::validate(self)?;
        if self.quantity < product.min_quantity {
            return Err(CommerceError::QuantityTooLow { minimum: product.min_quantity, requested: self.quantity });
        }

        let size_multiplier = match (&self.size_id, product.sizes.is_empty()) {
            (Some(id), _) => product.size(id).map(|s| s.price_multiplier).ok_or_else(|| unknown("size", id))?,
            (None, true) => Decimal::ONE,
            (None, false) => return Err(missing("size")),
        };
        let paper_multiplier = match (&self.paper_type_id, product.paper_types.is_empty()) {
            (Some(id), _) => product.paper_type(id).map(|p| p.price_multiplier).ok_or_else(|| unknown("paper type", id))?,
            (None, true) => Decimal::ONE,
            (None, false) => return Err(missing("paper type")),
        };
        let finishing_fee = match &self.finishing_id {
            Some(id) => product.finishing(id).map(|f| f.flat_fee).ok_or_else(|| unknown("finishing", id))?,
            None => Decimal::ZERO,
        };

        Ok(ResolvedOptions { size_multiplier, paper_multiplier, finishing_fee })
    }
}

fn unknown(kind: &str, id: &str) -> CommerceError {
    CommerceError::InvalidCustomization(format!("unknown {kind} '{id}'"))
}

fn missing(kind: &str) -> CommerceError {
    CommerceError::InvalidCustomization(format!("a {kind} must be selected"))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use rust_decimal_macros::dec;

    pub fn business_cards() -> ProductConfig {
        ProductConfig {
            id: "business-cards".into(),
            name: "Business Cards".into(),
            base_price: dec!(2.5),
            min_quantity: 100,
            sizes: vec![
                SizeOption { id: "standard".into(), price_multiplier: dec!(1) },
                SizeOption { id: "square".into(), price_multiplier: dec!(1.2) },
            ],
            paper_types: vec![
                PaperOption { id: "matte".into(), price_multiplier: dec!(1) },
                PaperOption { id: "premium".into(), price_multiplier: dec!(1.5) },
            ],
            finishings: vec![
                FinishingOption { id: "none".into(), flat_fee: dec!(0) },
                FinishingOption { id: "rounded-corners".into(), flat_fee: dec!(150) },
            ],
            bulk_discounts: vec![
                BulkDiscountTier { min_quantity: 500, discount_percent: dec!(10) },
                BulkDiscountTier { min_quantity: 1000, discount_percent: dec!(15) },
            ],
            has_color: true,
            has_double_side: true,
            has_lamination: true,
            has_urgent_delivery: true,
        }
    }

    pub fn customization(quantity: u32) -> Customization {
        Customization {
            size_id: Some("standard".into()),
            paper_type_id: Some("matte".into()),
            finishing_id: Some("none".into()),
            quantity,
            is_color: false,
            is_double_side: false,
            lamination: Lamination::None,
            is_urgent: false,
        }
    }
}
