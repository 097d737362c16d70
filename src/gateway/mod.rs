//! Payment gateway adapters
//!
//! Each adapter authenticates a provider's webhook and normalizes it into a
//! [`PaymentEvent`]. Nothing in a payload is looked at before its signature
//! checks out.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::domain::aggregates::PaymentMethod;
use crate::{CommerceError, Result};

pub mod card;
pub mod client;
pub mod cod;
pub mod wallet;

pub use card::CardGatewayAdapter;
pub use client::{HttpProviderClient, PaymentProviderClient};
pub use cod::CodAdapter;
pub use wallet::WalletGatewayAdapter;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome { Captured, Failed, Refunded }

/// Provider-neutral payment notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub method: PaymentMethod,
    pub provider_correlation_id: String,
    pub provider_transaction_id: Option<String>,
    pub outcome: PaymentOutcome,
    /// Minor currency units.
    pub amount: i64,
    pub failure_reason: Option<String>,
}

pub trait PaymentGatewayAdapter: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Header carrying the hex HMAC-SHA256 signature.
    fn signature_header(&self) -> &'static str;

    /// Authenticates `raw_payload` and normalizes it. `Ok(None)` is an
    /// authentic event with nothing to reconcile (an event type we do not
    /// act on, or a still-pending status).
    fn verify(&self, raw_payload: &[u8], signature: Option<&str>) -> Result<Option<PaymentEvent>>;
}

/// Hex HMAC-SHA256 of `message`, as a provider would compute it.
#[cfg(test)]
pub(crate) fn sign(secret: &str, message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a hex signature in constant time.
pub fn verify_signature(secret: &str, message: &[u8], signature: Option<&str>) -> Result<()> {
    let signature = signature.map(str::trim).filter(|s| !s.is_empty()).ok_or(CommerceError::SignatureInvalid)?;
    let expected = hex::decode(signature).map_err(|_| CommerceError::SignatureInvalid)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| CommerceError::SignatureInvalid)?;
    mac.update(message);
    mac.verify_slice(&expected).map_err(|_| CommerceError::SignatureInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let sig = sign("secret", b"order_1|pay_1");
        assert_eq!(sig.len(), 64);
        assert!(verify_signature("secret", b"order_1|pay_1", Some(&sig)).is_ok());
    }

    #[test]
    fn test_single_bit_flip_rejected() {
        let sig = sign("secret", b"payload");
        let mut bytes = hex::decode(&sig).unwrap();
        bytes[0] ^= 0x01;
        let flipped = hex::encode(bytes);
        assert!(matches!(verify_signature("secret", b"payload", Some(&flipped)), Err(CommerceError::SignatureInvalid)));
    }

    #[test]
    fn test_missing_or_garbage_signature_rejected() {
        assert!(verify_signature("secret", b"payload", None).is_err());
        assert!(verify_signature("secret", b"payload", Some("")).is_err());
        assert!(verify_signature("secret", b"payload", Some("not-hex")).is_err());
        assert!(verify_signature("other", b"payload", Some(&sign("secret", b"payload"))).is_err());
    }
}
