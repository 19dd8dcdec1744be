//! # Remit Mock Payment Provider
//!
//! A deterministic, in-memory [`PaymentProvider`](remit_core::PaymentProvider)
//! packaged as a plugin. It backs the scenario tests and the checkout demo.
//!
//! ```rust,ignore
//! use remit_provider_mock as mock;
//!
//! registry.register(mock::descriptor(), mock::factory()).await?;
//! registry.initialize(mock::MOCK_PROVIDER_NAME, PluginConfig::new()).await?;
//! registry.enable(mock::MOCK_PROVIDER_NAME).await?;
//! ```
//!
//! Webhook bodies are signed with HMAC-SHA256 under the configured
//! `webhook_secret` (default `test_secret`); see [`webhook`].

pub mod config;
mod plugin;
mod provider;
pub mod webhook;

pub use config::MockProviderConfig;
pub use plugin::{MOCK_PROVIDER_NAME, descriptor, factory, shared_factory};
pub use provider::{MockCharge, MockCustomer, MockPaymentProvider, MockRefund};
pub use webhook::{WebhookData, WebhookPayload};
