//! Environment configuration

use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::aggregates::OrderPolicy;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Credentials for one payment gateway.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub webhook_secret: String,
    pub key_id: String,
    pub key_secret: String,
    pub api_url: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    /// Postgres when set, in-memory fixtures otherwise.
    pub database_url: Option<String>,
    /// NATS notifier when set, log notifier otherwise.
    pub nats_url: Option<String>,
    pub policy: OrderPolicy,
    pub lamination_fee: Decimal,
    pub card: GatewayConfig,
    pub wallet: GatewayConfig,
    pub cod_webhook_secret: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };
        Ok(Self {
            port: env.parse("PORT", 8083)?,
            database_url: env.optional("DATABASE_URL"),
            nats_url: env.optional("NATS_URL"),
            policy: OrderPolicy {
                currency: env.optional("CURRENCY").unwrap_or_else(|| "INR".to_string()),
                tax_rate_percent: env.decimal("TAX_RATE_PERCENT", Decimal::new(18, 0))?,
                shipping_flat_fee: env.decimal("SHIPPING_FLAT_FEE", Decimal::new(50, 0))?,
                free_shipping_threshold: env.decimal("FREE_SHIPPING_THRESHOLD", Decimal::new(500, 0))?,
            },
            lamination_fee: env.decimal("LAMINATION_FEE_PER_UNIT", Decimal::new(50, 2))?,
            card: GatewayConfig {
                webhook_secret: env.required("CARD_GATEWAY_WEBHOOK_SECRET")?,
                key_id: env.required("CARD_GATEWAY_KEY_ID")?,
                key_secret: env.required("CARD_GATEWAY_KEY_SECRET")?,
                api_url: env.required("CARD_GATEWAY_API_URL")?,
            },
            wallet: GatewayConfig {
                webhook_secret: env.required("WALLET_GATEWAY_WEBHOOK_SECRET")?,
                key_id: env.required("WALLET_GATEWAY_KEY_ID")?,
                key_secret: env.required("WALLET_GATEWAY_KEY_SECRET")?,
                api_url: env.required("WALLET_GATEWAY_API_URL")?,
            },
            cod_webhook_secret: env.required("COD_WEBHOOK_SECRET")?,
        })
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    // Webhook secrets must never default: an empty HMAC key is forgeable.
    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn parse<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(name) {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
            None => Ok(default),
        }
    }

    fn decimal(&self, name: &'static str, default: Decimal) -> Result<Decimal, ConfigError> {
        let value = self.parse(name, default)?;
        if value.is_sign_negative() {
            return Err(ConfigError::Invalid { name, value: value.to_string() });
        }
        Ok(value)
    }
}
