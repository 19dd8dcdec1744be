//! Event handler trait and helpers.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::EventContext;
use crate::error::HandlerError;
use crate::event::DomainEvent;

/// Result of a single handler call. `Ok` carries handler-defined data.
pub type HandlerResult = Result<Value, HandlerError>;

/// Conventional handler priorities. Any `i32` is accepted.
pub struct Priority;

impl Priority {
    pub const HIGHEST: i32 = 100;
    pub const HIGH: i32 = 75;
    pub const NORMAL: i32 = 50;
    pub const LOW: i32 = 25;
    pub const LOWEST: i32 = 0;
}

/// A subscriber reacting to one or more event kinds.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Stable name used in reports and logs.
    fn name(&self) -> &str;

    /// Pre-filter; a handler that declines is skipped and not reported.
    fn can_handle(&self, _event: &DomainEvent) -> bool {
        true
    }

    async fn handle(&self, ctx: &EventContext) -> HandlerResult;
}

/// An [`EventHandler`] backed by an async closure.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

/// Wraps an async closure as a handler.
///
/// ```rust,ignore
/// bus.subscribe(
///     EventKind::PaymentFailed,
///     handler_fn("alert", |ctx| async move { Ok(json!({ "seen": ctx.event().id() })) }),
///     Priority::LOW,
/// );
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<FnHandler<F>>
where
    F: Fn(EventContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &EventContext) -> HandlerResult {
        (self.f)(ctx.clone()).await
    }
}
