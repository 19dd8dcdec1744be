//! The payment capability.
//!
//! Concrete gateway wire protocols live behind this interface; the core only
//! ever sees [`PaymentProvider`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::capability::CapabilityProvider;
use crate::error::ProviderResult;
use crate::money::Money;

/// Lifecycle of a charge on the provider side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Created,
    Captured,
    PartiallyRefunded,
    Refunded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeResult {
    pub charge_id: String,
    pub customer_ref: String,
    pub amount: Money,
    pub status: ChargeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub charge_id: String,
    pub amount: Money,
    pub status: ChargeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundResult {
    pub refund_id: String,
    pub charge_id: String,
    pub amount: Money,
    /// Status of the charge after the refund.
    pub status: ChargeStatus,
}

/// Normalized webhook event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventKind {
    PaymentSucceeded,
    PaymentFailed,
    RefundCreated,
    SubscriptionCancelled,
    DisputeCreated,
    Unknown,
}

impl WebhookEventKind {
    /// Maps a dotted provider event type to the normalized kind.
    pub fn from_type(ty: &str) -> Self {
        match ty {
            "payment.succeeded" | "payment.captured" | "charge.succeeded" => Self::PaymentSucceeded,
            "payment.failed" | "charge.failed" => Self::PaymentFailed,
            "refund.created" | "charge.refunded" => Self::RefundCreated,
            "subscription.cancelled" | "subscription.deleted" => Self::SubscriptionCancelled,
            "dispute.created" => Self::DisputeCreated,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for WebhookEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PaymentSucceeded => "payment.succeeded",
            Self::PaymentFailed => "payment.failed",
            Self::RefundCreated => "refund.created",
            Self::SubscriptionCancelled => "subscription.cancelled",
            Self::DisputeCreated => "dispute.created",
            Self::Unknown => "unknown",
        })
    }
}

/// A verified, provider-independent webhook event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEvent {
    pub event_id: String,
    pub kind: WebhookEventKind,
    pub charge_id: Option<String>,
    pub invoice_id: Option<Uuid>,
    pub amount: Option<Money>,
    /// The payload as received, for audit.
    pub raw: Value,
}

/// Minimal contract every payment plugin implements.
#[async_trait]
pub trait PaymentProvider: CapabilityProvider {
    /// Creates a customer record and returns the provider's reference for it.
    async fn create_customer(&self, email: &str) -> ProviderResult<String>;

    /// Authorizes a charge of `amount` against a customer.
    async fn create_charge(&self, amount: &Money, customer_ref: &str)
    -> ProviderResult<ChargeResult>;

    async fn capture_payment(&self, charge_id: &str) -> ProviderResult<CaptureResult>;

    /// Refunds a captured charge; `None` refunds the remaining amount.
    async fn refund(&self, charge_id: &str, amount: Option<&Money>)
    -> ProviderResult<RefundResult>;

    async fn charge_status(&self, charge_id: &str) -> ProviderResult<ChargeStatus>;

    /// Verifies a webhook signature and parses the payload.
    async fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> ProviderResult<ParsedEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_kind_mapping() {
        assert_eq!(
            WebhookEventKind::from_type("payment.succeeded"),
            WebhookEventKind::PaymentSucceeded
        );
        assert_eq!(
            WebhookEventKind::from_type("refund.created"),
            WebhookEventKind::RefundCreated
        );
        assert_eq!(
            WebhookEventKind::from_type("invoice.finalized"),
            WebhookEventKind::Unknown
        );
    }
}
