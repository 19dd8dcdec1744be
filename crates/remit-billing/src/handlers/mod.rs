//! Event handlers that own every ledger mutation.
//!
//! Request paths publish events; only these handlers write to the ledger.

mod capture;
mod checkout;
mod expiry;
mod failed;
mod refund;

use std::sync::Arc;

use remit_core::{
    DomainEvent, EventBus, EventContext, EventKind, EventPayload, Priority, SubscriptionId,
};
use tracing::{debug, warn};

use crate::error::{BillingError, BillingResult};
use crate::ledger::{Effect, Ledger};
use crate::model::{Invoice, LineItem};
use crate::notify::Notifier;
use crate::report::{ItemOutcome, SettlementReport};

pub use capture::PaymentCapturedHandler;
pub use checkout::{CheckoutHandler, CheckoutReceipt};
pub use expiry::SubscriptionExpiryHandler;
pub use failed::PaymentFailedHandler;
pub use refund::PaymentRefundedHandler;

/// Shared dependencies of the billing handlers.
#[derive(Clone)]
pub struct BillingServices {
    pub ledger: Arc<Ledger>,
    pub notifier: Arc<dyn Notifier>,
}

impl BillingServices {
    pub fn new(ledger: Arc<Ledger>, notifier: Arc<dyn Notifier>) -> Self {
        Self { ledger, notifier }
    }

    /// Passes `event` to the notifier, logging a failure.
    pub(crate) async fn notify(&self, event: &DomainEvent) {
        if let Err(e) = self.notifier.notify(event).await {
            warn!(event_id = %event.id(), kind = %event.kind(), error = %e, "Notification failed");
        }
    }

    /// Queues each payload as a follow-up event and notifies about it.
    pub(crate) async fn emit_all(&self, ctx: &EventContext, payloads: Vec<EventPayload>) {
        for payload in payloads {
            let event = DomainEvent::new(payload);
            self.notify(&event).await;
            ctx.emit(event);
        }
    }
}

/// Accumulates per-item results while a payment event is applied.
pub(crate) struct Settlement {
    report: SettlementReport,
    follow_ups: Vec<EventPayload>,
    violation: Option<remit_core::InvariantViolation>,
}

impl Settlement {
    pub(crate) fn new(invoice: &Invoice, status_written: bool) -> Self {
        Self {
            report: SettlementReport::new(invoice, status_written),
            follow_ups: Vec::new(),
            violation: None,
        }
    }

    pub(crate) fn record(&mut self, item: &LineItem, result: BillingResult<Effect>) {
        match result {
            Ok(effect) => {
                self.report.push(item, effect.outcome());
                self.follow_ups.extend(effect.events);
            }
            Err(e) => {
                warn!(
                    invoice_id = %self.report.invoice_id,
                    line_item_id = %item.id,
                    kind = %item.kind,
                    reference_id = %item.reference_id,
                    error = %e,
                    "Line item failed"
                );
                let reason = e.to_string();
                if let BillingError::Invariant(v) = e {
                    self.violation.get_or_insert(v);
                }
                self.report.push(item, ItemOutcome::Failed { reason });
            }
        }
    }

    /// Records an item whose reversal had nothing to undo.
    pub(crate) fn skip(&mut self, item: &LineItem) {
        debug!(
            invoice_id = %self.report.invoice_id,
            line_item_id = %item.id,
            kind = %item.kind,
            "Line item was never applied; nothing to reverse"
        );
        self.report.push(item, ItemOutcome::NotApplied);
    }

    pub(crate) fn set_status(&mut self, invoice: &Invoice, status_written: bool) {
        self.report.invoice_status = invoice.status;
        self.report.status_written = status_written;
    }

    /// Emits the collected follow-ups and converts the report into the
    /// handler result. An invariant violation outranks item failures.
    pub(crate) async fn finish(
        self,
        services: &BillingServices,
        ctx: &EventContext,
    ) -> remit_core::HandlerResult {
        services.emit_all(ctx, self.follow_ups).await;
        if let Some(v) = self.violation {
            return Err(v.into());
        }
        self.report.into_handler_result()
    }
}

/// Subscribes the billing handlers to `bus`.
pub fn register_billing_handlers(bus: &EventBus, services: BillingServices) -> Vec<SubscriptionId> {
    vec![
        bus.subscribe(
            EventKind::CheckoutRequested,
            Arc::new(CheckoutHandler::new(services.clone())),
            Priority::NORMAL,
        ),
        bus.subscribe(
            EventKind::PaymentCaptured,
            Arc::new(PaymentCapturedHandler::new(services.clone())),
            Priority::NORMAL,
        ),
        bus.subscribe(
            EventKind::PaymentRefunded,
            Arc::new(PaymentRefundedHandler::new(services.clone())),
            Priority::NORMAL,
        ),
        bus.subscribe(
            EventKind::PaymentFailed,
            Arc::new(PaymentFailedHandler::new(services.clone())),
            Priority::NORMAL,
        ),
        bus.subscribe(
            EventKind::SubscriptionExpiryDue,
            Arc::new(SubscriptionExpiryHandler::new(services)),
            Priority::NORMAL,
        ),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use remit_core::{EventBus, Money};

    use super::*;
    use crate::memory::InMemoryCatalog;
    use crate::model::{Addon, Plan, TokenBundle};
    use crate::notify::RecordingNotifier;
    use crate::repository::Repositories;

    pub struct Harness {
        pub bus: EventBus,
        pub ledger: Arc<Ledger>,
        pub notifier: Arc<RecordingNotifier>,
    }

    fn usd(minor: i64) -> Money {
        Money::new(minor, "USD").unwrap()
    }

    pub fn harness() -> Harness {
        let catalog = InMemoryCatalog::new()
            .with_plan(Plan {
                id: "pro_monthly".into(),
                name: "Pro".into(),
                price: usd(1999),
                duration_days: 30,
            })
            .with_token_bundle(TokenBundle {
                id: "tokens_100".into(),
                name: "100 tokens".into(),
                tokens: 100,
                price: usd(500),
            })
            .with_addon(Addon {
                id: "priority_support".into(),
                name: "Priority support".into(),
                price: usd(300),
            });
        let ledger = Arc::new(Ledger::new(Repositories::in_memory(catalog)));
        let notifier = Arc::new(RecordingNotifier::new());
        let bus = EventBus::default();
        register_billing_handlers(
            &bus,
            BillingServices::new(ledger.clone(), notifier.clone()),
        );
        Harness {
            bus,
            ledger,
            notifier,
        }
    }
}
