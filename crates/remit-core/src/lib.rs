//! # Remit Core
//!
//! Foundation layer of the Remit billing core:
//!
//! - [`DomainEvent`] / [`EventPayload`] / [`EventKind`]: the closed set of
//!   immutable domain events.
//! - [`EventBus`]: priority-ordered, sequential publish/subscribe with
//!   per-handler deadlines, panic isolation, propagation control and
//!   follow-up events.
//! - [`CapabilityProvider`] / [`PaymentProvider`]: the contracts a plugin's
//!   executable behavior implements.
//! - [`Money`]: integer minor-unit amounts.

pub mod bus;
pub mod capability;
pub mod context;
pub mod error;
pub mod event;
pub mod handler;
pub mod money;
pub mod payment;

pub use bus::{BusConfig, EventBus, HandlerOutcome, PublishReport, SubscriptionId};
pub use capability::{Capability, CapabilityProvider, PluginCategory};
pub use context::EventContext;
pub use error::{HandlerError, InvariantViolation, MoneyError, ProviderError, ProviderResult};
pub use event::{
    AddonChanged, CheckoutRequested, DomainEvent, EventKind, EventPayload, ExpiryDue, LineItemKind,
    LineItemRequest, PaymentCaptured, PaymentFailed, PaymentRefunded, PluginLifecycle,
    SubscriptionChanged, TokensChanged,
};
pub use handler::{EventHandler, FnHandler, HandlerResult, Priority, handler_fn};
pub use money::Money;
pub use payment::{
    CaptureResult, ChargeResult, ChargeStatus, ParsedEvent, PaymentProvider, RefundResult,
    WebhookEventKind,
};
