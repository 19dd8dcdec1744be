//! Webhook signing and parsing.
//!
//! Payloads are JSON:
//!
//! ```json
//! {
//!   "id": "evt_mock_0001",
//!   "type": "payment.succeeded",
//!   "data": { "charge_id": "ch_mock_0001", "invoice_id": "…", "amount": 1999, "currency": "USD" }
//! }
//! ```
//!
//! The signature is the lowercase hex HMAC-SHA256 of the raw body.

use hmac::{Hmac, Mac};
use remit_core::{Money, ParsedEvent, ProviderError, ProviderResult, WebhookEventKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str) -> ProviderResult<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ProviderError::Unavailable(format!("invalid webhook secret: {e}")))
}

pub fn sign(secret: &str, payload: &[u8]) -> ProviderResult<String> {
    let mut mac = mac(secret)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature.
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> ProviderResult<()> {
    let expected = hex::decode(signature.trim()).map_err(|_| ProviderError::InvalidSignature)?;
    let mut mac = mac(secret)?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| ProviderError::InvalidSignature)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<Uuid>,
    /// Minor units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: WebhookData,
}

impl WebhookPayload {
    pub fn new(id: impl Into<String>, kind: WebhookEventKind) -> Self {
        Self {
            id: id.into(),
            event_type: kind.to_string(),
            data: WebhookData::default(),
        }
    }

    pub fn charge(mut self, charge_id: impl Into<String>) -> Self {
        self.data.charge_id = Some(charge_id.into());
        self
    }

    pub fn invoice(mut self, invoice_id: Uuid) -> Self {
        self.data.invoice_id = Some(invoice_id);
        self
    }

    pub fn amount(mut self, amount: &Money) -> Self {
        self.data.amount = Some(amount.minor());
        self.data.currency = Some(amount.currency().to_string());
        self
    }

    pub fn to_bytes(&self) -> ProviderResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProviderError::MalformedPayload(e.to_string()))
    }
}

/// Parses a raw body into a provider-independent event.
pub fn parse(payload: &[u8]) -> ProviderResult<ParsedEvent> {
    let raw: Value = serde_json::from_slice(payload)
        .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;
    let body: WebhookPayload = serde_json::from_value(raw.clone())
        .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;

    let amount = match (body.data.amount, body.data.currency.as_deref()) {
        (Some(minor), Some(currency)) => Some(
            Money::new(minor, currency).map_err(|e| ProviderError::InvalidAmount(e.to_string()))?,
        ),
        _ => None,
    };

    Ok(ParsedEvent {
        event_id: body.id,
        kind: WebhookEventKind::from_type(&body.event_type),
        charge_id: body.data.charge_id,
        invoice_id: body.data.invoice_id,
        amount,
        raw,
    })
}
