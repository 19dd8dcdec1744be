//! Runtime error types.

use remit_billing::BillingError;
use remit_core::{EventKind, HandlerError, ProviderError};
use remit_plugin::{PluginError, StoreError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by [`BillingRuntime`](crate::BillingRuntime) operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// No Enabled payment plugin with this name.
    #[error("payment provider '{0}' is not enabled")]
    ProviderUnavailable(String),

    /// A handler the operation depends on did not succeed.
    #[error("handler '{handler}' failed: {error}")]
    HandlerFailed {
        handler: String,
        #[source]
        error: HandlerError,
    },

    #[error("no handler is subscribed to {0}")]
    NoHandler(EventKind),
}

impl RuntimeError {
    pub fn handler_failed(handler: impl Into<String>, error: HandlerError) -> Self {
        Self::HandlerFailed {
            handler: handler.into(),
            error,
        }
    }

    /// Whether the failure is a broken billing invariant.
    pub fn is_invariant(&self) -> bool {
        match self {
            Self::HandlerFailed { error, .. } => error.is_invariant(),
            Self::Billing(BillingError::Invariant(_)) => true,
            _ => false,
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
