use async_trait::async_trait;
use remit_core::{DomainEvent, EventContext, EventHandler, EventPayload, HandlerError, HandlerResult};
use serde_json::json;
use tracing::debug;

use super::BillingServices;

/// Expires due subscriptions on `subscription.expiry_due` and raises one
/// `subscription.expired` follow-up per subscription.
pub struct SubscriptionExpiryHandler {
    services: BillingServices,
}

impl SubscriptionExpiryHandler {
    pub const NAME: &'static str = "billing.subscription_expiry";

    pub fn new(services: BillingServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl EventHandler for SubscriptionExpiryHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, event: &DomainEvent) -> bool {
        matches!(event.payload(), EventPayload::SubscriptionExpiryDue(_))
    }

    async fn handle(&self, ctx: &EventContext) -> HandlerResult {
        let EventPayload::SubscriptionExpiryDue(due) = ctx.event().payload() else {
            return Err(HandlerError::failed("expected subscription.expiry_due"));
        };

        let expired = self.services.ledger.expire_due(due.as_of).await?;
        let ids: Vec<_> = expired
            .iter()
            .filter_map(|p| match p {
                EventPayload::SubscriptionExpired(s) => Some(s.subscription_id),
                _ => None,
            })
            .collect();
        debug!(as_of = %due.as_of, expired = ids.len(), "Expiry sweep finished");
        self.services.emit_all(ctx, expired).await;

        Ok(json!({ "as_of": due.as_of, "expired": ids }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use remit_core::{EventKind, LineItemRequest};
    use uuid::Uuid;

    use super::*;
    use crate::handlers::testing::harness;
    use crate::model::SubscriptionStatus;

    #[tokio::test]
    async fn test_expiry_runs_through_the_bus() {
        let h = harness();
        let user = Uuid::new_v4();
        let report = h
            .bus
            .publish(DomainEvent::checkout_requested(
                user,
                vec![LineItemRequest::plan("pro_monthly")],
            ))
            .await;
        let invoice_id: Uuid =
            serde_json::from_value(report.data("billing.checkout").unwrap()["invoice_id"].clone())
                .unwrap();
        h.bus
            .publish(DomainEvent::payment_captured(invoice_id, "mock", "ch_1"))
            .await;

        let early = h
            .bus
            .publish(DomainEvent::subscription_expiry_due(Utc::now()))
            .await;
        assert!(early.is_success());
        assert!(early.follow_ups.is_empty());

        let later = Utc::now() + Duration::days(31);
        let due = h
            .bus
            .publish(DomainEvent::subscription_expiry_due(later))
            .await;
        assert!(due.is_fully_successful());
        assert_eq!(due.follow_up_kinds(), vec![EventKind::SubscriptionExpired]);
        let data = due.data(SubscriptionExpiryHandler::NAME).unwrap();
        assert_eq!(data["expired"].as_array().unwrap().len(), 1);
        assert_eq!(h.notifier.kinds().last(), Some(&EventKind::SubscriptionExpired));

        let subs = h.ledger.subscriptions_for(user).await.unwrap();
        assert_eq!(subs[0].status, SubscriptionStatus::Expired);

        let again = h
            .bus
            .publish(DomainEvent::subscription_expiry_due(later))
            .await;
        assert!(again.follow_ups.is_empty());
    }
}
