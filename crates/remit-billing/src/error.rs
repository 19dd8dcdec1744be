//! Billing error types.

use remit_core::{HandlerError, InvariantViolation, MoneyError};
use thiserror::Error;
use uuid::Uuid;

use crate::model::InvoiceStatus;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("checkout requires at least one line item")]
    EmptyCheckout,

    #[error("checkout may contain at most one plan")]
    MultiplePlans,

    #[error("invoice {0} not found")]
    InvoiceNotFound(Uuid),

    #[error("subscription {0} not found")]
    SubscriptionNotFound(Uuid),

    #[error("invoice {0} has no linked subscription")]
    NoSubscriptionLinked(Uuid),

    #[error("plan '{0}' not found")]
    PlanNotFound(String),

    #[error("token bundle '{0}' not found")]
    BundleNotFound(String),

    #[error("add-on '{0}' not found")]
    AddonNotFound(String),

    #[error("no token bundle purchase recorded for line item {0}")]
    PurchaseNotFound(Uuid),

    #[error("no add-on subscription recorded for line item {0}")]
    AddonSubscriptionNotFound(Uuid),

    #[error("cannot {action} invoice {invoice_id} while {status}")]
    InvalidInvoiceState {
        invoice_id: Uuid,
        status: InvoiceStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error("repository error: {0}")]
    Repository(String),
}

impl BillingError {
    pub fn repository(msg: impl Into<String>) -> Self {
        Self::Repository(msg.into())
    }
}

impl From<BillingError> for HandlerError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Invariant(v) => HandlerError::Invariant(v),
            other => HandlerError::failed(other.to_string()),
        }
    }
}

/// Result type for billing operations.
pub type BillingResult<T> = Result<T, BillingError>;
