//! In-process, priority-ordered publish/subscribe.
//!
//! [`EventBus`] decouples producers (request handlers, webhook ingestion,
//! the plugin registry) from the handlers that mutate state. Dispatch of one
//! event is sequential: handlers run one after another in descending priority,
//! ties broken by subscription order. A failing, panicking or timed-out
//! handler never prevents its siblings from running; every outcome is
//! collected into a [`PublishReport`] that the publisher inspects.
//!
//! Handlers may raise follow-up events through
//! [`EventContext::emit`](crate::EventContext::emit). They are published once
//! the parent event is fully dispatched, up to
//! [`BusConfig::max_follow_up_depth`] levels deep.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, trace, warn};
use uuid::Uuid;

use crate::context::{DispatchState, EventContext};
use crate::error::HandlerError;
use crate::event::{DomainEvent, EventKind};
use crate::handler::{EventHandler, HandlerResult};

/// Bus tuning knobs.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Deadline for a single handler call.
    pub handler_timeout: Duration,
    /// How many levels of follow-up events are dispatched.
    pub max_follow_up_depth: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(5),
            max_follow_up_depth: 4,
        }
    }
}

/// Opaque handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    priority: i32,
    handler: Arc<dyn EventHandler>,
}

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one handler for one event.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub handler: String,
    pub priority: i32,
    pub result: HandlerResult,
}

impl HandlerOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Everything that happened while publishing one event.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub event_id: Uuid,
    pub kind: EventKind,
    /// One entry per handler that ran, in execution order.
    pub outcomes: Vec<HandlerOutcome>,
    /// Handler that stopped propagation, if any.
    pub stopped_by: Option<String>,
    /// Reports for events emitted by handlers, in emission order.
    pub follow_ups: Vec<PublishReport>,
}

impl PublishReport {
    /// `true` when no handler for this event failed.
    ///
    /// Follow-up failures are not included; see [`is_fully_successful`](Self::is_fully_successful).
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(HandlerOutcome::is_ok)
    }

    /// `true` when neither this event nor any follow-up had a failure.
    pub fn is_fully_successful(&self) -> bool {
        self.is_success() && self.follow_ups.iter().all(Self::is_fully_successful)
    }

    pub fn no_handlers(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Handlers of this event that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &HandlerError)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Ok(_) => None,
            Err(e) => Some((o.handler.as_str(), e)),
        })
    }

    pub fn outcome(&self, handler: &str) -> Option<&HandlerOutcome> {
        self.outcomes.iter().find(|o| o.handler == handler)
    }

    /// Success data of the named handler.
    pub fn data(&self, handler: &str) -> Option<&Value> {
        self.outcome(handler).and_then(|o| o.result.as_ref().ok())
    }

    /// Depth-first walk over this report and every follow-up.
    pub fn iter_all(&self) -> Vec<&PublishReport> {
        let mut out = vec![self];
        for f in &self.follow_ups {
            out.extend(f.iter_all());
        }
        out
    }

    /// Kinds of every follow-up event, depth-first.
    pub fn follow_up_kinds(&self) -> Vec<EventKind> {
        self.iter_all().into_iter().skip(1).map(|r| r.kind).collect()
    }
}

// =============================================================================
// EventBus
// =============================================================================

/// The priority-ordered event bus.
///
/// Constructed explicitly and shared by `Arc`; independent instances do not
/// interact.
pub struct EventBus {
    config: BusConfig,
    subscriptions: RwLock<HashMap<EventKind, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // ─── Subscriptions ───────────────────────────────────────────────────────

    /// Subscribes `handler` to `kind` at `priority`.
    ///
    /// Higher priorities run first; equal priorities run in subscription order.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
        priority: i32,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = handler.name().to_string();
        let mut subs = self.subscriptions.write();
        let list = subs.entry(kind).or_default();
        // Insert after every existing entry of equal or higher priority.
        let pos = list
            .iter()
            .position(|s| s.priority < priority)
            .unwrap_or(list.len());
        list.insert(
            pos,
            Subscription {
                id,
                priority,
                handler,
            },
        );
        debug!(event = %kind, handler = %name, priority, "Handler subscribed");
        id
    }

    /// Removes a subscription. Returns `false` if it was not present.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        for (kind, list) in subs.iter_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                let removed = list.remove(pos);
                debug!(event = %kind, handler = %removed.handler.name(), "Handler unsubscribed");
                return true;
            }
        }
        false
    }

    /// Number of handlers subscribed to `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.subscriptions.read().get(&kind).map_or(0, Vec::len)
    }

    // ─── Publishing ──────────────────────────────────────────────────────────

    /// Publishes an event and waits for every handler (and follow-up) to finish.
    pub async fn publish(&self, event: DomainEvent) -> PublishReport {
        self.publish_with(event, &CancellationToken::new()).await
    }

    /// Publishes under an external cancellation token.
    ///
    /// Cancelling the token makes the running handler and every handler not yet
    /// started report [`HandlerError::Cancelled`].
    pub async fn publish_with(&self, event: DomainEvent, cancel: &CancellationToken) -> PublishReport {
        self.dispatch(event, cancel.clone(), 0).await
    }

    fn dispatch(
        &self,
        event: DomainEvent,
        cancel: CancellationToken,
        depth: usize,
    ) -> BoxFuture<'_, PublishReport> {
        let kind = event.kind();
        let span = debug_span!("publish", event = %kind, event_id = %event.id(), depth);

        async move {
            // Snapshot under a brief read lock; handlers may (un)subscribe.
            let handlers: Vec<(Arc<dyn EventHandler>, i32)> = self
                .subscriptions
                .read()
                .get(&kind)
                .map(|list| {
                    list.iter()
                        .map(|s| (Arc::clone(&s.handler), s.priority))
                        .collect()
                })
                .unwrap_or_default();

            if handlers.is_empty() {
                debug!("No handlers subscribed");
            }

            let event_id = event.id();
            let state = Arc::new(DispatchState::new(event, depth, cancel.clone()));
            let mut outcomes = Vec::with_capacity(handlers.len());

            for (handler, priority) in handlers {
                if !state.is_propagating() {
                    break;
                }
                if !handler.can_handle(state.event()) {
                    trace!(handler = %handler.name(), "Handler declined event");
                    continue;
                }

                let name = handler.name().to_string();
                let ctx = EventContext::new(Arc::clone(&state), &name);
                let result = self
                    .run_handler(handler.as_ref(), &ctx)
                    .instrument(debug_span!("handler", handler = %name, priority))
                    .await;

                match &result {
                    Ok(_) => debug!(handler = %name, "Handler completed"),
                    Err(e @ HandlerError::Invariant(_)) => {
                        error!(handler = %name, error = %e, "Handler reported an invariant violation")
                    }
                    Err(e) => warn!(handler = %name, error = %e, "Handler failed"),
                }

                outcomes.push(HandlerOutcome {
                    handler: name,
                    priority,
                    result,
                });
            }

            let stopped_by = state.stopped_by();
            if let Some(by) = &stopped_by {
                debug!(stopped_by = %by, "Propagation stopped");
            }

            let mut follow_ups = Vec::new();
            for next in state.take_follow_ups() {
                if depth >= self.config.max_follow_up_depth {
                    warn!(
                        follow_up = %next.kind(),
                        max_depth = self.config.max_follow_up_depth,
                        "Follow-up event dropped: maximum depth reached"
                    );
                    continue;
                }
                follow_ups.push(self.dispatch(next, cancel.clone(), depth + 1).await);
            }

            PublishReport {
                event_id,
                kind,
                outcomes,
                stopped_by,
                follow_ups,
            }
        }
        .instrument(span)
        .boxed()
    }

    /// Runs one handler under the bus deadline, the dispatch cancellation token,
    /// and a panic guard.
    async fn run_handler(&self, handler: &dyn EventHandler, ctx: &EventContext) -> HandlerResult {
        let cancel = ctx.cancellation();
        if cancel.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }

        let timeout = self.config.handler_timeout;
        let call = AssertUnwindSafe(handler.handle(ctx)).catch_unwind();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HandlerError::Cancelled),
            res = tokio::time::timeout(timeout, call) => match res {
                Err(_) => Err(HandlerError::Timeout(timeout)),
                Ok(Err(panic)) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
                Ok(Ok(result)) => result,
            },
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
