//! Per-dispatch context handed to event handlers.
//!
//! One [`DispatchState`] is created per published event and shared (via
//! `Arc`) by every handler that runs for it. Stopping propagation in one
//! handler is therefore immediately visible to the dispatch loop, and events
//! emitted by any handler are queued on the same state for follow-up dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::event::DomainEvent;

// =============================================================================
// DispatchState: shared, one per published event
// =============================================================================

pub(crate) struct DispatchState {
    event: DomainEvent,
    depth: usize,
    cancel: CancellationToken,
    /// Cleared by the first handler that calls [`EventContext::stop_propagation`].
    is_propagating: AtomicBool,
    stopped_by: Mutex<Option<String>>,
    follow_ups: Mutex<Vec<DomainEvent>>,
}

impl DispatchState {
    pub(crate) fn new(event: DomainEvent, depth: usize, cancel: CancellationToken) -> Self {
        Self {
            event,
            depth,
            cancel,
            is_propagating: AtomicBool::new(true),
            stopped_by: Mutex::new(None),
            follow_ups: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn event(&self) -> &DomainEvent {
        &self.event
    }

    pub(crate) fn is_propagating(&self) -> bool {
        self.is_propagating.load(Ordering::SeqCst)
    }

    pub(crate) fn stopped_by(&self) -> Option<String> {
        self.stopped_by.lock().clone()
    }

    pub(crate) fn take_follow_ups(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut *self.follow_ups.lock())
    }
}

// =============================================================================
// EventContext: what a handler sees
// =============================================================================

/// The context passed to [`EventHandler::handle`](crate::EventHandler::handle).
///
/// Cheap to clone; all clones refer to the same dispatch.
#[derive(Clone)]
pub struct EventContext {
    state: Arc<DispatchState>,
    handler: Arc<str>,
}

impl EventContext {
    pub(crate) fn new(state: Arc<DispatchState>, handler: &str) -> Self {
        Self {
            state,
            handler: Arc::from(handler),
        }
    }

    /// The event being dispatched.
    pub fn event(&self) -> &DomainEvent {
        &self.state.event
    }

    /// Name of the handler this context was built for.
    pub fn handler_name(&self) -> &str {
        &self.handler
    }

    /// Follow-up nesting level; `0` for an event published directly.
    pub fn depth(&self) -> usize {
        self.state.depth
    }

    /// Prevents lower-priority handlers from seeing this event.
    ///
    /// The handler currently running still completes and its outcome is
    /// recorded. Only the first caller is reported as the stopper.
    pub fn stop_propagation(&self) {
        if self.state.is_propagating.swap(false, Ordering::SeqCst) {
            *self.state.stopped_by.lock() = Some(self.handler.to_string());
        }
    }

    pub fn is_propagating(&self) -> bool {
        self.state.is_propagating()
    }

    /// Queues a follow-up event.
    ///
    /// Follow-ups are published after every handler for the current event has
    /// run, so they never observe a half-dispatched parent.
    pub fn emit(&self, event: DomainEvent) {
        self.state.follow_ups.lock().push(event);
    }

    /// Cancellation token for this dispatch; long-running handlers should
    /// observe it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.state.cancel
    }
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("event", &self.state.event.kind())
            .field("handler", &self.handler)
            .field("is_propagating", &self.is_propagating())
            .finish_non_exhaustive()
    }
}
