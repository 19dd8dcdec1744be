//! Storage seams for ledger entities.
//!
//! The ledger only talks to these traits; [`crate::memory`] provides the
//! in-process implementations.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::memory::{
    InMemoryAddonRepo, InMemoryCatalog, InMemoryInvoiceRepo, InMemorySubscriptionRepo,
    InMemoryTokenRepo,
};
use crate::model::{
    Addon, AddonSubscription, Invoice, Plan, Subscription, TokenBalance, TokenBundle,
    TokenBundlePurchase, TokenSettlement, TokenTransaction,
};

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn find(&self, id: Uuid) -> BillingResult<Option<Invoice>>;
    async fn save(&self, invoice: &Invoice) -> BillingResult<()>;
    async fn list_for_user(&self, user_id: Uuid) -> BillingResult<Vec<Invoice>>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find(&self, id: Uuid) -> BillingResult<Option<Subscription>>;
    async fn save(&self, subscription: &Subscription) -> BillingResult<()>;
    async fn list_for_user(&self, user_id: Uuid) -> BillingResult<Vec<Subscription>>;
    /// Every subscription currently `Active`, across all users.
    async fn list_active(&self) -> BillingResult<Vec<Subscription>>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Returns a zero balance for users that never held tokens.
    async fn balance(&self, user_id: Uuid) -> BillingResult<TokenBalance>;
    /// Overwrites a balance without an audit entry. Used for seeding and
    /// out-of-band spending.
    async fn save_balance(&self, balance: &TokenBalance) -> BillingResult<()>;
    async fn transactions(&self, user_id: Uuid) -> BillingResult<Vec<TokenTransaction>>;
    async fn find_purchase(&self, line_item_id: Uuid)
    -> BillingResult<Option<TokenBundlePurchase>>;
    /// Stores balance, transaction and purchase together, or none of them.
    async fn settle(&self, settlement: &TokenSettlement) -> BillingResult<()>;
}

#[async_trait]
pub trait AddonRepository: Send + Sync {
    async fn find_by_line_item(&self, line_item_id: Uuid)
    -> BillingResult<Option<AddonSubscription>>;
    async fn save(&self, addon: &AddonSubscription) -> BillingResult<()>;
    async fn list_for_user(&self, user_id: Uuid) -> BillingResult<Vec<AddonSubscription>>;
}

/// Read-only product catalog.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn plan(&self, id: &str) -> BillingResult<Option<Plan>>;
    async fn token_bundle(&self, id: &str) -> BillingResult<Option<TokenBundle>>;
    async fn addon(&self, id: &str) -> BillingResult<Option<Addon>>;
}

/// The full set of repositories the ledger needs.
#[derive(Clone)]
pub struct Repositories {
    pub invoices: Arc<dyn InvoiceRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub tokens: Arc<dyn TokenRepository>,
    pub addons: Arc<dyn AddonRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
}

impl Repositories {
    /// Fresh in-memory storage over the given catalog.
    pub fn in_memory(catalog: InMemoryCatalog) -> Self {
        Self {
            invoices: Arc::new(InMemoryInvoiceRepo::new()),
            subscriptions: Arc::new(InMemorySubscriptionRepo::new()),
            tokens: Arc::new(InMemoryTokenRepo::new()),
            addons: Arc::new(InMemoryAddonRepo::new()),
            catalog: Arc::new(catalog),
        }
    }
}
