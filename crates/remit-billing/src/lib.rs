//! # Remit Billing
//!
//! The ledger and the event-driven state machine that drives it.
//!
//! Request-handling code never mutates billing state. It publishes
//! `checkout.requested`, `payment.captured`, `payment.refunded`,
//! `payment.failed` or `subscription.expiry_due` on the
//! [`remit_core::EventBus`], and the handlers
//! installed by [`register_billing_handlers`] apply the transitions:
//!
//! ```text
//! Invoice        Pending ──► Paid ──► Refunded
//!                   └──────► Void
//! Subscription   Pending ──► Active ──► Cancelled | Expired
//! ```
//!
//! Settlement is per line item. A failing item is reported, never rolled
//! back, and a redelivered event completes whatever is still missing.

pub mod error;
pub mod handlers;
pub mod ledger;
pub mod lock;
pub mod memory;
pub mod model;
pub mod notify;
pub mod report;
pub mod repository;

pub use error::{BillingError, BillingResult};
pub use handlers::{
    BillingServices, CheckoutHandler, CheckoutReceipt, PaymentCapturedHandler,
    PaymentFailedHandler, PaymentRefundedHandler, SubscriptionExpiryHandler,
    register_billing_handlers,
};
pub use ledger::{Effect, Ledger};
pub use lock::UserLocks;
pub use memory::{
    InMemoryAddonRepo, InMemoryCatalog, InMemoryInvoiceRepo, InMemorySubscriptionRepo,
    InMemoryTokenRepo,
};
pub use model::{
    Addon, AddonStatus, AddonSubscription, Invoice, InvoiceStatus, LineItem, Plan,
    PurchaseStatus, Subscription, SubscriptionStatus, TokenBalance, TokenBundle,
    TokenBundlePurchase, TokenSettlement, TokenTransaction, TokenTransactionKind,
};
pub use notify::{Notifier, NotifyError, RecordingNotifier, TracingNotifier};
pub use report::{ItemOutcome, LineItemReport, SettlementReport};
pub use repository::{
    AddonRepository, CatalogRepository, InvoiceRepository, Repositories, SubscriptionRepository,
    TokenRepository,
};
