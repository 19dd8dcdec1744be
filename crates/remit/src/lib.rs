//! # Remit
//!
//! Pluggable payment providers and an event-driven billing ledger.
//!
//! ```text
//! ┌──────────────┐  publish   ┌──────────┐  handlers  ┌────────┐
//! │ BillingRuntime│──────────▶│ EventBus │───────────▶│ Ledger │
//! └──────┬───────┘            └──────────┘            └────────┘
//!        │ verify webhooks
//!        ▼
//! ┌────────────────┐
//! │ PluginRegistry │──▶ PaymentProvider (mock, ...)
//! └────────────────┘
//! ```
//!
//! - **core**: domain events, the event bus, money and provider contracts
//! - **plugin**: descriptors, dependency resolution and the plugin lifecycle
//! - **billing**: invoices, subscriptions, tokens, add-ons and their handlers
//! - **runtime**: configuration, logging and the assembled runtime
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use remit::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> RuntimeResult<()> {
//!     let runtime = BillingRuntime::builder().catalog(catalog()).build()?;
//!     runtime
//!         .install_plugin(remit::mock::descriptor(), remit::mock::factory())
//!         .await?;
//!
//!     let checkout = runtime
//!         .checkout(user_id, vec![LineItemRequest::plan("pro_monthly")])
//!         .await?;
//!     runtime
//!         .pay_invoice(checkout.receipt.invoice_id, "mock_payment", "me@example.com")
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: `remit.toml` configuration files
//! - `yaml-config`: `remit.yaml` configuration files
//! - `json-log`: JSON log output
//! - `mock-provider`: the in-memory payment provider as [`mock`]

pub use remit_billing as billing;
pub use remit_core as core;
pub use remit_plugin as plugin;
pub use remit_runtime as runtime;

#[cfg(feature = "mock-provider")]
pub use remit_provider_mock as mock;

/// Commonly used types.
///
/// ```rust,ignore
/// use remit::prelude::*;
/// ```
pub mod prelude {
    // Runtime entry point
    pub use remit_runtime::{
        BillingRuntime, CheckoutOutcome, RemitConfig, RuntimeError, RuntimeResult, WebhookOutcome,
    };

    // Events and the bus
    pub use remit_core::{
        DomainEvent, EventBus, EventContext, EventHandler, EventKind, EventPayload,
        HandlerError, HandlerResult, LineItemRequest, Money, Priority, PublishReport, handler_fn,
    };

    // Provider contracts
    pub use remit_core::{Capability, CapabilityProvider, PaymentProvider, PluginCategory};

    // Plugins
    pub use remit_plugin::{
        PluginConfig, PluginDescriptor, PluginRegistry, PluginStatus, VersionConstraint,
        provider_factory,
    };

    // Billing
    pub use remit_billing::{
        Addon, InMemoryCatalog, Invoice, InvoiceStatus, Plan, Subscription, SubscriptionStatus,
        TokenBundle,
    };
}
