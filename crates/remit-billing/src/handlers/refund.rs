use async_trait::async_trait;
use chrono::Utc;
use remit_core::{
    DomainEvent, EventContext, EventHandler, EventPayload, HandlerError, HandlerResult,
    LineItemKind,
};
use tracing::info;

use super::{BillingServices, Settlement};
use crate::error::BillingError;

/// Reverses a paid invoice on `payment.refunded`.
///
/// Every line item is reversed on its own; the invoice is marked
/// `Refunded` afterwards even if some reversals failed, since the money
/// has already moved. Items whose capture never applied are reported as
/// [`ItemOutcome::NotApplied`](crate::ItemOutcome::NotApplied).
pub struct PaymentRefundedHandler {
    services: BillingServices,
}

impl PaymentRefundedHandler {
    pub const NAME: &'static str = "billing.payment_refunded";

    pub fn new(services: BillingServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl EventHandler for PaymentRefundedHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, event: &DomainEvent) -> bool {
        matches!(event.payload(), EventPayload::PaymentRefunded(_))
    }

    async fn handle(&self, ctx: &EventContext) -> HandlerResult {
        let EventPayload::PaymentRefunded(refunded) = ctx.event().payload() else {
            return Err(HandlerError::failed("expected payment.refunded"));
        };
        let ledger = &self.services.ledger;

        let user_id = ledger.invoice(refunded.invoice_id).await?.user_id;
        let guard = ledger.lock_user(user_id).await;
        let mut invoice = ledger.invoice(refunded.invoice_id).await?;
        ledger.ensure_refundable(&invoice)?;

        let now = Utc::now();
        let mut settlement = Settlement::new(&invoice, false);
        for item in &invoice.line_items {
            let result = match item.kind {
                LineItemKind::Subscription => ledger.cancel_subscription(&invoice, now).await,
                LineItemKind::TokenBundle => ledger.debit_bundle(&invoice, item, now).await,
                LineItemKind::AddOn => ledger.cancel_addon(&invoice, item, now).await,
            };
            match result {
                Err(
                    BillingError::PurchaseNotFound(_) | BillingError::AddonSubscriptionNotFound(_),
                ) => settlement.skip(item),
                other => settlement.record(item, other),
            }
        }

        let status_written = ledger.mark_refunded(&mut invoice, now).await?;
        settlement.set_status(&invoice, status_written);
        if status_written {
            info!(
                invoice_id = %invoice.id,
                refund_id = ?refunded.refund_id,
                "Invoice refunded"
            );
        }
        drop(guard);

        settlement.finish(&self.services, ctx).await
    }
}
