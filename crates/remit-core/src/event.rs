//! Domain events.
//!
//! A [`DomainEvent`] is an immutable, timestamped record of something that
//! happened. The set of well-known events is closed: each one is a variant of
//! [`EventPayload`], and [`EventKind`] is its field-less discriminant used as
//! the subscription key on the [`EventBus`](crate::EventBus). Adding an event
//! therefore forces every exhaustive `match` over kinds to be revisited.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// EventKind
// =============================================================================

/// Discriminant of an [`EventPayload`], with a stable dotted wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "checkout.requested")]
    CheckoutRequested,
    #[serde(rename = "payment.captured")]
    PaymentCaptured,
    #[serde(rename = "payment.refunded")]
    PaymentRefunded,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "subscription.activated")]
    SubscriptionActivated,
    #[serde(rename = "subscription.cancelled")]
    SubscriptionCancelled,
    #[serde(rename = "subscription.expiry_due")]
    SubscriptionExpiryDue,
    #[serde(rename = "subscription.expired")]
    SubscriptionExpired,
    #[serde(rename = "tokens.credited")]
    TokensCredited,
    #[serde(rename = "tokens.debited")]
    TokensDebited,
    #[serde(rename = "addon.activated")]
    AddonActivated,
    #[serde(rename = "addon.cancelled")]
    AddonCancelled,
    #[serde(rename = "plugin.registered")]
    PluginRegistered,
    #[serde(rename = "plugin.initialized")]
    PluginInitialized,
    #[serde(rename = "plugin.enabled")]
    PluginEnabled,
    #[serde(rename = "plugin.disabled")]
    PluginDisabled,
    #[serde(rename = "plugin.uninstalled")]
    PluginUninstalled,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 17] = [
        Self::CheckoutRequested,
        Self::PaymentCaptured,
        Self::PaymentRefunded,
        Self::PaymentFailed,
        Self::SubscriptionActivated,
        Self::SubscriptionCancelled,
        Self::SubscriptionExpiryDue,
        Self::SubscriptionExpired,
        Self::TokensCredited,
        Self::TokensDebited,
        Self::AddonActivated,
        Self::AddonCancelled,
        Self::PluginRegistered,
        Self::PluginInitialized,
        Self::PluginEnabled,
        Self::PluginDisabled,
        Self::PluginUninstalled,
    ];

    /// The dotted wire name, e.g. `payment.captured`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckoutRequested => "checkout.requested",
            Self::PaymentCaptured => "payment.captured",
            Self::PaymentRefunded => "payment.refunded",
            Self::PaymentFailed => "payment.failed",
            Self::SubscriptionActivated => "subscription.activated",
            Self::SubscriptionCancelled => "subscription.cancelled",
            Self::SubscriptionExpiryDue => "subscription.expiry_due",
            Self::SubscriptionExpired => "subscription.expired",
            Self::TokensCredited => "tokens.credited",
            Self::TokensDebited => "tokens.debited",
            Self::AddonActivated => "addon.activated",
            Self::AddonCancelled => "addon.cancelled",
            Self::PluginRegistered => "plugin.registered",
            Self::PluginInitialized => "plugin.initialized",
            Self::PluginEnabled => "plugin.enabled",
            Self::PluginDisabled => "plugin.disabled",
            Self::PluginUninstalled => "plugin.uninstalled",
        }
    }

    /// Looks a kind up by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Kind of a purchasable line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemKind {
    Subscription,
    TokenBundle,
    AddOn,
}

impl fmt::Display for LineItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Subscription => "subscription",
            Self::TokenBundle => "token_bundle",
            Self::AddOn => "add_on",
        })
    }
}

/// One requested item in a checkout: a catalog reference of a given kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemRequest {
    pub kind: LineItemKind,
    /// Plan, bundle or add-on id in the catalog.
    pub reference_id: String,
}

impl LineItemRequest {
    pub fn plan(id: impl Into<String>) -> Self {
        Self {
            kind: LineItemKind::Subscription,
            reference_id: id.into(),
        }
    }

    pub fn token_bundle(id: impl Into<String>) -> Self {
        Self {
            kind: LineItemKind::TokenBundle,
            reference_id: id.into(),
        }
    }

    pub fn add_on(id: impl Into<String>) -> Self {
        Self {
            kind: LineItemKind::AddOn,
            reference_id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequested {
    pub user_id: Uuid,
    pub items: Vec<LineItemRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCaptured {
    pub invoice_id: Uuid,
    pub provider: String,
    pub charge_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRefunded {
    pub invoice_id: Uuid,
    pub provider: Option<String>,
    pub refund_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub invoice_id: Uuid,
    pub provider: Option<String>,
    pub reason: Option<String>,
}

/// Asks the billing handlers to expire every subscription due at `as_of`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryDue {
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionChanged {
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    pub plan_id: String,
    pub invoice_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensChanged {
    pub user_id: Uuid,
    pub invoice_id: Uuid,
    /// Tokens actually moved.
    pub amount: u64,
    /// Tokens that could not be debited because the balance was too low.
    pub shortfall: u64,
    /// Balance after the change.
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonChanged {
    pub user_id: Uuid,
    pub addon_subscription_id: Uuid,
    pub addon_id: String,
    pub invoice_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginLifecycle {
    pub name: String,
    pub version: String,
}

/// Typed body of a [`DomainEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    #[serde(rename = "checkout.requested")]
    CheckoutRequested(CheckoutRequested),
    #[serde(rename = "payment.captured")]
    PaymentCaptured(PaymentCaptured),
    #[serde(rename = "payment.refunded")]
    PaymentRefunded(PaymentRefunded),
    #[serde(rename = "payment.failed")]
    PaymentFailed(PaymentFailed),
    #[serde(rename = "subscription.activated")]
    SubscriptionActivated(SubscriptionChanged),
    #[serde(rename = "subscription.cancelled")]
    SubscriptionCancelled(SubscriptionChanged),
    #[serde(rename = "subscription.expiry_due")]
    SubscriptionExpiryDue(ExpiryDue),
    #[serde(rename = "subscription.expired")]
    SubscriptionExpired(SubscriptionChanged),
    #[serde(rename = "tokens.credited")]
    TokensCredited(TokensChanged),
    #[serde(rename = "tokens.debited")]
    TokensDebited(TokensChanged),
    #[serde(rename = "addon.activated")]
    AddonActivated(AddonChanged),
    #[serde(rename = "addon.cancelled")]
    AddonCancelled(AddonChanged),
    #[serde(rename = "plugin.registered")]
    PluginRegistered(PluginLifecycle),
    #[serde(rename = "plugin.initialized")]
    PluginInitialized(PluginLifecycle),
    #[serde(rename = "plugin.enabled")]
    PluginEnabled(PluginLifecycle),
    #[serde(rename = "plugin.disabled")]
    PluginDisabled(PluginLifecycle),
    #[serde(rename = "plugin.uninstalled")]
    PluginUninstalled(PluginLifecycle),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::CheckoutRequested(_) => EventKind::CheckoutRequested,
            Self::PaymentCaptured(_) => EventKind::PaymentCaptured,
            Self::PaymentRefunded(_) => EventKind::PaymentRefunded,
            Self::PaymentFailed(_) => EventKind::PaymentFailed,
            Self::SubscriptionActivated(_) => EventKind::SubscriptionActivated,
            Self::SubscriptionCancelled(_) => EventKind::SubscriptionCancelled,
            Self::SubscriptionExpiryDue(_) => EventKind::SubscriptionExpiryDue,
            Self::SubscriptionExpired(_) => EventKind::SubscriptionExpired,
            Self::TokensCredited(_) => EventKind::TokensCredited,
            Self::TokensDebited(_) => EventKind::TokensDebited,
            Self::AddonActivated(_) => EventKind::AddonActivated,
            Self::AddonCancelled(_) => EventKind::AddonCancelled,
            Self::PluginRegistered(_) => EventKind::PluginRegistered,
            Self::PluginInitialized(_) => EventKind::PluginInitialized,
            Self::PluginEnabled(_) => EventKind::PluginEnabled,
            Self::PluginDisabled(_) => EventKind::PluginDisabled,
            Self::PluginUninstalled(_) => EventKind::PluginUninstalled,
        }
    }

    /// The user the event concerns, when it is user-scoped.
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::CheckoutRequested(p) => Some(p.user_id),
            Self::SubscriptionActivated(p)
            | Self::SubscriptionCancelled(p)
            | Self::SubscriptionExpired(p) => Some(p.user_id),
            Self::TokensCredited(p) | Self::TokensDebited(p) => Some(p.user_id),
            Self::AddonActivated(p) | Self::AddonCancelled(p) => Some(p.user_id),
            Self::PaymentCaptured(_)
            | Self::PaymentRefunded(_)
            | Self::PaymentFailed(_)
            | Self::SubscriptionExpiryDue(_)
            | Self::PluginRegistered(_)
            | Self::PluginInitialized(_)
            | Self::PluginEnabled(_)
            | Self::PluginDisabled(_)
            | Self::PluginUninstalled(_) => None,
        }
    }
}

// =============================================================================
// DomainEvent
// =============================================================================

/// An immutable, timestamped domain event.
///
/// Events are fire-and-forget within the process and are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    id: Uuid,
    occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority_hint: Option<i32>,
    payload: EventPayload,
}

impl DomainEvent {
    /// Stamps a payload with a fresh id and the current time.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            priority_hint: None,
            payload,
        }
    }

    /// Attaches an advisory priority hint.
    pub fn with_priority_hint(mut self, priority: i32) -> Self {
        self.priority_hint = Some(priority);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn priority_hint(&self) -> Option<i32> {
        self.priority_hint
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    // ─── Constructors for the well-known events ──────────────────────────────

    pub fn checkout_requested(user_id: Uuid, items: Vec<LineItemRequest>) -> Self {
        Self::new(EventPayload::CheckoutRequested(CheckoutRequested {
            user_id,
            items,
        }))
    }

    pub fn payment_captured(
        invoice_id: Uuid,
        provider: impl Into<String>,
        charge_id: impl Into<String>,
    ) -> Self {
        Self::new(EventPayload::PaymentCaptured(PaymentCaptured {
            invoice_id,
            provider: provider.into(),
            charge_id: charge_id.into(),
        }))
    }

    pub fn payment_refunded(invoice_id: Uuid) -> Self {
        Self::new(EventPayload::PaymentRefunded(PaymentRefunded {
            invoice_id,
            provider: None,
            refund_id: None,
        }))
    }

    pub fn payment_failed(invoice_id: Uuid, reason: Option<String>) -> Self {
        Self::new(EventPayload::PaymentFailed(PaymentFailed {
            invoice_id,
            provider: None,
            reason,
        }))
    }

    pub fn subscription_expiry_due(as_of: DateTime<Utc>) -> Self {
        Self::new(EventPayload::SubscriptionExpiryDue(ExpiryDue { as_of }))
    }
}
