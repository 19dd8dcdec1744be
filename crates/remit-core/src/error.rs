//! Error types shared across the billing core.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Errors produced when constructing or combining [`Money`](crate::Money).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("amount must not be negative: {0}")]
    Negative(i64),

    #[error("invalid currency code: '{0}'")]
    InvalidCurrency(String),

    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },

    #[error("amount overflow")]
    Overflow,
}

/// A broken state-machine invariant.
///
/// This is a programming defect, never an expected runtime condition. It is
/// always surfaced to the caller and must not be swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invariant violated: {message}")]
pub struct InvariantViolation {
    pub message: String,
}

impl InvariantViolation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The outcome of a single handler call that did not succeed.
///
/// Handler errors are collected by the bus and returned to the publisher;
/// they never abort dispatch to sibling handlers.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The handler ran and reported a failure.
    ///
    /// `data` carries structured detail (e.g. a partial settlement report).
    #[error("{message}")]
    Failed {
        message: String,
        data: Option<Value>,
    },

    /// The handler exceeded the bus deadline.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    /// Dispatch was cancelled before or while the handler ran.
    #[error("handler cancelled")]
    Cancelled,

    /// The handler panicked; the panic was contained by the bus.
    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

impl HandlerError {
    /// Creates a plain failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            data: None,
        }
    }

    /// Creates a failure carrying structured detail.
    pub fn failed_with(message: impl Into<String>, data: Value) -> Self {
        Self::Failed {
            message: message.into(),
            data: Some(data),
        }
    }

    /// Structured detail attached to a [`HandlerError::Failed`], if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Failed { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

/// Errors reported by capability providers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("payment declined: {0}")]
    Declined(String),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the same call may succeed when repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Result type for capability provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;
