//! Pricing engine for customized print products
//!
//! Pure and deterministic: the same product and customization always give the
//! same breakdown. All arithmetic is decimal. The unit price is kept exact;
//! money amounts are rounded to two places as they are produced, and
//! `final_price` is derived from the rounded components so the breakdown
//! always adds up exactly.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::aggregates::product::{Customization, ProductConfig};
use crate::domain::value_objects::round_money;
use crate::Result;

const COLOR_SURCHARGE_PERCENT: i64 = 20;
const DOUBLE_SIDE_SURCHARGE_PERCENT: i64 = 50;
const URGENT_SURCHARGE_PERCENT: i64 = 25;

/// Priced snapshot of one line item, frozen onto the order at placement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub base_price: Decimal,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub finishing_cost: Decimal,
    pub urgent_cost: Decimal,
    pub bulk_discount_percent: Decimal,
    pub bulk_discount: Decimal,
    pub final_price: Decimal,
    pub price_per_unit: Decimal,
}

impl PriceBreakdown {
    pub fn pre_discount_total(&self) -> Decimal {
        self.subtotal + self.finishing_cost + self.urgent_cost
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PricingEngine {
    /// Per-unit surcharge for any lamination other than `none`.
    pub lamination_fee: Decimal,
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self { lamination_fee: Decimal::new(50, 2) }
    }
}

impl PricingEngine {
    pub fn new(lamination_fee: Decimal) -> Self {
        Self { lamination_fee }
    }

    pub fn compute(&self, product: &ProductConfig, customization: &Customization) -> Result<PriceBreakdown> {
        let options = customization.resolve(product)?;
        let quantity = Decimal::from(customization.quantity);

        let mut unit_price = product.base_price * options.size_multiplier * options.paper_multiplier;
        if customization.is_color && product.has_color {
            unit_price += percent_of(unit_price, COLOR_SURCHARGE_PERCENT);
        }
        if customization.is_double_side && product.has_double_side {
            unit_price += percent_of(unit_price, DOUBLE_SIDE_SURCHARGE_PERCENT);
        }
        if !customization.lamination.is_none() && product.has_lamination {
            unit_price += self.lamination_fee;
        }

        let subtotal = round_money(unit_price * quantity);
        let finishing_cost = round_money(options.finishing_fee);
        let urgent_cost = if customization.is_urgent && product.has_urgent_delivery {
            round_money(percent_of(subtotal, URGENT_SURCHARGE_PERCENT))
        } else {
            Decimal::ZERO
        };

        let bulk_discount_percent = bulk_discount_percent(product, customization.quantity);
        let pre_discount_total = subtotal + finishing_cost + urgent_cost;
        let bulk_discount = round_money(pre_discount_total * bulk_discount_percent / Decimal::ONE_HUNDRED);

        let final_price = pre_discount_total - bulk_discount;
        let price_per_unit = round_money(final_price / quantity);

        Ok(PriceBreakdown {
            base_price: product.base_price,
            unit_price,
            subtotal,
            finishing_cost,
            urgent_cost,
            bulk_discount_percent,
            bulk_discount,
            final_price,
            price_per_unit,
        })
    }
}

fn percent_of(amount: Decimal, percent: i64) -> Decimal {
    amount * Decimal::from(percent) / Decimal::ONE_HUNDRED
}

/// Discount of the highest threshold the quantity reaches. Tiers never stack.
fn bulk_discount_percent(product: &ProductConfig, quantity: u32) -> Decimal {
    product
        .bulk_discounts
        .iter()
        .filter(|tier| quantity >= tier.min_quantity)
        .max_by_key(|tier| tier.min_quantity)
        .map(|tier| tier.discount_percent)
        .unwrap_or(Decimal::ZERO)
}
