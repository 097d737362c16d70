//! Value Objects for the print storefront

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

const ORDER_NUMBER_PREFIX: &str = "ORD";
const ORDER_NUMBER_WIDTH: usize = 6;

/// Human-facing order number, `ORD` followed by a zero-padded sequence value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn from_sequence(value: u64) -> Self {
        Self(format!("{ORDER_NUMBER_PREFIX}{value:0width$}", width = ORDER_NUMBER_WIDTH))
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, OrderNumberError> {
        let value = value.into().trim().to_uppercase();
        let digits = value.strip_prefix(ORDER_NUMBER_PREFIX).ok_or(OrderNumberError::MissingPrefix)?;
        if digits.len() < ORDER_NUMBER_WIDTH || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(OrderNumberError::InvalidCounter);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderNumberError { MissingPrefix, InvalidCounter }
impl std::error::Error for OrderNumberError {}
impl fmt::Display for OrderNumberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPrefix => write!(f, "order number must start with {ORDER_NUMBER_PREFIX}"),
            Self::InvalidCounter => write!(f, "order number counter must be {ORDER_NUMBER_WIDTH} or more digits"),
        }
    }
}

/// Rounds a currency amount to two decimal places, half away from zero.
/// The result always carries exactly two decimal places.
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Converts a major-unit amount (rupees) to minor units (paise).
pub fn to_minor_units(amount: Decimal) -> i64 {
    (round_money(amount) * Decimal::ONE_HUNDRED).to_i64().unwrap_or(i64::MAX)
}

pub fn from_minor_units(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}
