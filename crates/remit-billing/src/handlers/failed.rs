use async_trait::async_trait;
use chrono::Utc;
use remit_core::{
    DomainEvent, EventContext, EventHandler, EventPayload, HandlerError, HandlerResult,
};
use serde_json::json;
use tracing::info;

use super::BillingServices;

/// Voids a pending invoice on `payment.failed` and cancels the
/// subscription it would have activated.
pub struct PaymentFailedHandler {
    services: BillingServices,
}

impl PaymentFailedHandler {
    pub const NAME: &'static str = "billing.payment_failed";

    pub fn new(services: BillingServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl EventHandler for PaymentFailedHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, event: &DomainEvent) -> bool {
        matches!(event.payload(), EventPayload::PaymentFailed(_))
    }

    async fn handle(&self, ctx: &EventContext) -> HandlerResult {
        let EventPayload::PaymentFailed(failed) = ctx.event().payload() else {
            return Err(HandlerError::failed("expected payment.failed"));
        };
        let ledger = &self.services.ledger;

        let user_id = ledger.invoice(failed.invoice_id).await?.user_id;
        let guard = ledger.lock_user(user_id).await;
        let mut invoice = ledger.invoice(failed.invoice_id).await?;

        let now = Utc::now();
        let status_written = ledger.mark_void(&mut invoice, now).await?;
        let effect = ledger.void_pending_subscription(&invoice, now).await?;
        drop(guard);

        if status_written {
            info!(invoice_id = %invoice.id, reason = ?failed.reason, "Invoice voided");
            // The user hears about the failure even when nothing else changed.
            self.services.notify(ctx.event()).await;
        }
        let subscription_cancelled = effect.applied;
        self.services.emit_all(ctx, effect.events).await;

        Ok(json!({
            "invoice_id": invoice.id,
            "invoice_status": invoice.status,
            "status_written": status_written,
            "subscription_cancelled": subscription_cancelled,
            "reason": failed.reason,
        }))
    }
}
