//! Outbound notifications for ledger changes.

use async_trait::async_trait;
use parking_lot::Mutex;
use remit_core::{DomainEvent, EventKind};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Receives the follow-up events billing handlers produce.
///
/// Failures are logged by the caller and never fail the handler.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &DomainEvent) -> Result<(), NotifyError>;
}

/// Writes each notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: &DomainEvent) -> Result<(), NotifyError> {
        info!(
            event_id = %event.id(),
            kind = %event.kind(),
            user_id = ?event.payload().user_id(),
            "Billing notification"
        );
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<DomainEvent>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier that records and then reports failure.
    pub fn failing() -> Self {
        Self {
            events: Mutex::default(),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(DomainEvent::kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &DomainEvent) -> Result<(), NotifyError> {
        self.events.lock().push(event.clone());
        if self.fail {
            return Err(NotifyError("recording notifier set to fail".into()));
        }
        Ok(())
    }
}
