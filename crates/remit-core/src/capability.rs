//! Capability provider contracts.
//!
//! A capability provider is the executable behavior bound to a plugin. Its
//! lifetime is owned by the plugin registry: it is created when the plugin is
//! initialized and released through [`CapabilityProvider::teardown`] when the
//! plugin is disabled or uninstalled.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::payment::PaymentProvider;

/// Category of a plugin, which decides the interface its provider exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginCategory {
    /// Payment gateway adapter; the provider implements [`PaymentProvider`].
    Payment,
    /// Analytics widget or sink.
    Analytics,
    /// Client-side UI extension.
    UiExtension,
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Payment => "payment",
            Self::Analytics => "analytics",
            Self::UiExtension => "ui_extension",
        })
    }
}

/// Base trait of every capability provider.
#[async_trait]
pub trait CapabilityProvider: Send + Sync + 'static {
    fn category(&self) -> PluginCategory;

    /// Releases resources held by the provider.
    ///
    /// Called exactly once by the registry before the provider is dropped.
    async fn teardown(&self) -> ProviderResult<()>;
}

/// Typed handle to an instantiated provider.
#[derive(Clone)]
pub enum Capability {
    Payment(Arc<dyn PaymentProvider>),
    Extension(Arc<dyn CapabilityProvider>),
}

impl Capability {
    pub fn category(&self) -> PluginCategory {
        match self {
            Self::Payment(p) => p.category(),
            Self::Extension(p) => p.category(),
        }
    }

    /// Returns the payment interface, if this is a payment provider.
    pub fn as_payment(&self) -> Option<Arc<dyn PaymentProvider>> {
        match self {
            Self::Payment(p) => Some(Arc::clone(p)),
            Self::Extension(_) => None,
        }
    }

    pub async fn teardown(&self) -> ProviderResult<()> {
        match self {
            Self::Payment(p) => p.teardown().await,
            Self::Extension(p) => p.teardown().await,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Capability")
            .field(&self.category())
            .finish()
    }
}
