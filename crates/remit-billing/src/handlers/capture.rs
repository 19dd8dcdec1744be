use async_trait::async_trait;
use chrono::Utc;
use remit_core::{
    DomainEvent, EventContext, EventHandler, EventPayload, HandlerError, HandlerResult,
    LineItemKind,
};
use tracing::info;

use super::{BillingServices, Settlement};

/// Settles an invoice on `payment.captured`.
///
/// The invoice moves to `Paid` first, then each line item is applied on its
/// own. A redelivered capture finds the invoice already paid and re-checks
/// every item, which completes any item that failed the first time.
pub struct PaymentCapturedHandler {
    services: BillingServices,
}

impl PaymentCapturedHandler {
    pub const NAME: &'static str = "billing.payment_captured";

    pub fn new(services: BillingServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl EventHandler for PaymentCapturedHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, event: &DomainEvent) -> bool {
        matches!(event.payload(), EventPayload::PaymentCaptured(_))
    }

    async fn handle(&self, ctx: &EventContext) -> HandlerResult {
        let EventPayload::PaymentCaptured(captured) = ctx.event().payload() else {
            return Err(HandlerError::failed("expected payment.captured"));
        };
        let ledger = &self.services.ledger;

        let user_id = ledger.invoice(captured.invoice_id).await?.user_id;
        let guard = ledger.lock_user(user_id).await;
        let mut invoice = ledger.invoice(captured.invoice_id).await?;

        let now = Utc::now();
        let status_written = ledger
            .mark_paid(&mut invoice, &captured.provider, &captured.charge_id, now)
            .await?;
        if status_written {
            info!(
                invoice_id = %invoice.id,
                provider = %captured.provider,
                charge_id = %captured.charge_id,
                "Invoice paid"
            );
        } else {
            info!(invoice_id = %invoice.id, "Invoice already paid, re-checking line items");
        }

        let mut settlement = Settlement::new(&invoice, status_written);
        for item in &invoice.line_items {
            let result = match item.kind {
                LineItemKind::Subscription => ledger.activate_subscription(&invoice, now).await,
                LineItemKind::TokenBundle => ledger.credit_bundle(&invoice, item, now).await,
                LineItemKind::AddOn => ledger.activate_addon(&invoice, item, now).await,
            };
            settlement.record(item, result);
        }
        drop(guard);

        settlement.finish(&self.services, ctx).await
    }
}
