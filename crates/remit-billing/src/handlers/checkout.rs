use async_trait::async_trait;
use chrono::Utc;
use remit_core::{
    DomainEvent, EventContext, EventHandler, EventPayload, HandlerError, HandlerResult, Money,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::BillingServices;

/// Handler data returned for a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub amount: Money,
    pub subscription_id: Option<Uuid>,
}

/// Turns `checkout.requested` into a pending invoice.
pub struct CheckoutHandler {
    services: BillingServices,
}

impl CheckoutHandler {
    pub const NAME: &'static str = "billing.checkout";

    pub fn new(services: BillingServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl EventHandler for CheckoutHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, event: &DomainEvent) -> bool {
        matches!(event.payload(), EventPayload::CheckoutRequested(_))
    }

    async fn handle(&self, ctx: &EventContext) -> HandlerResult {
        let EventPayload::CheckoutRequested(request) = ctx.event().payload() else {
            return Err(HandlerError::failed("expected checkout.requested"));
        };
        debug!(user_id = %request.user_id, items = request.items.len(), "Handling checkout");

        let ledger = &self.services.ledger;
        let _guard = ledger.lock_user(request.user_id).await;
        let invoice = ledger
            .open_invoice(request.user_id, &request.items, Utc::now())
            .await?;

        let receipt = CheckoutReceipt {
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number,
            amount: invoice.amount,
            subscription_id: invoice.subscription_id,
        };
        serde_json::to_value(receipt).map_err(|e| HandlerError::failed(e.to_string()))
    }
}
