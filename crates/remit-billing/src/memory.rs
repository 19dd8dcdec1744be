//! In-memory repositories.
//!
//! Used by tests, the demo binary and any deployment that does not need
//! durable ledger storage.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::model::{
    Addon, AddonSubscription, Invoice, Plan, Subscription, SubscriptionStatus, TokenBalance,
    TokenBundle, TokenBundlePurchase, TokenSettlement, TokenTransaction,
};
use crate::repository::{
    AddonRepository, CatalogRepository, InvoiceRepository, SubscriptionRepository,
    TokenRepository,
};

// ─── Invoices ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryInvoiceRepo {
    invoices: RwLock<HashMap<Uuid, Invoice>>,
}

impl InMemoryInvoiceRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryInvoiceRepo {
    async fn find(&self, id: Uuid) -> BillingResult<Option<Invoice>> {
        Ok(self.invoices.read().get(&id).cloned())
    }

    async fn save(&self, invoice: &Invoice) -> BillingResult<()> {
        self.invoices.write().insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> BillingResult<Vec<Invoice>> {
        let mut out: Vec<_> = self
            .invoices
            .read()
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|i| i.created_at);
        Ok(out)
    }
}

// ─── Subscriptions ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemorySubscriptionRepo {
    subscriptions: RwLock<HashMap<Uuid, Subscription>>,
}

impl InMemorySubscriptionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepo {
    async fn find(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        Ok(self.subscriptions.read().get(&id).cloned())
    }

    async fn save(&self, subscription: &Subscription) -> BillingResult<()> {
        self.subscriptions
            .write()
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> BillingResult<Vec<Subscription>> {
        let mut out: Vec<_> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn list_active(&self) -> BillingResult<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .read()
            .values()
            .filter(|s| s.status == SubscriptionStatus::Active)
            .cloned()
            .collect())
    }
}

// ─── Tokens ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryTokenRepo {
    balances: RwLock<HashMap<Uuid, u64>>,
    transactions: RwLock<Vec<TokenTransaction>>,
    purchases: RwLock<HashMap<Uuid, TokenBundlePurchase>>,
}

impl InMemoryTokenRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a balance directly, bypassing the audit trail.
    pub fn with_balance(self, user_id: Uuid, balance: u64) -> Self {
        self.balances.write().insert(user_id, balance);
        self
    }
}

#[async_trait]
impl TokenRepository for InMemoryTokenRepo {
    async fn balance(&self, user_id: Uuid) -> BillingResult<TokenBalance> {
        let balance = self.balances.read().get(&user_id).copied().unwrap_or(0);
        Ok(TokenBalance { user_id, balance })
    }

    async fn save_balance(&self, balance: &TokenBalance) -> BillingResult<()> {
        self.balances
            .write()
            .insert(balance.user_id, balance.balance);
        Ok(())
    }

    async fn transactions(&self, user_id: Uuid) -> BillingResult<Vec<TokenTransaction>> {
        Ok(self
            .transactions
            .read()
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_purchase(
        &self,
        line_item_id: Uuid,
    ) -> BillingResult<Option<TokenBundlePurchase>> {
        Ok(self.purchases.read().get(&line_item_id).cloned())
    }

    async fn settle(&self, settlement: &TokenSettlement) -> BillingResult<()> {
        // All three guards are held before anything is written.
        let mut balances = self.balances.write();
        let mut transactions = self.transactions.write();
        let mut purchases = self.purchases.write();
        balances.insert(settlement.balance.user_id, settlement.balance.balance);
        transactions.push(settlement.transaction.clone());
        purchases.insert(
            settlement.purchase.line_item_id,
            settlement.purchase.clone(),
        );
        Ok(())
    }
}

// ─── Add-ons ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryAddonRepo {
    addons: RwLock<HashMap<Uuid, AddonSubscription>>,
}

impl InMemoryAddonRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AddonRepository for InMemoryAddonRepo {
    async fn find_by_line_item(
        &self,
        line_item_id: Uuid,
    ) -> BillingResult<Option<AddonSubscription>> {
        Ok(self.addons.read().get(&line_item_id).cloned())
    }

    async fn save(&self, addon: &AddonSubscription) -> BillingResult<()> {
        self.addons.write().insert(addon.line_item_id, addon.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> BillingResult<Vec<AddonSubscription>> {
        let mut out: Vec<_> = self
            .addons
            .read()
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|a| a.activated_at);
        Ok(out)
    }
}

// ─── Catalog ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryCatalog {
    plans: HashMap<String, Plan>,
    bundles: HashMap<String, TokenBundle>,
    addons: HashMap<String, Addon>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plans.insert(plan.id.clone(), plan);
        self
    }

    pub fn with_token_bundle(mut self, bundle: TokenBundle) -> Self {
        self.bundles.insert(bundle.id.clone(), bundle);
        self
    }

    pub fn with_addon(mut self, addon: Addon) -> Self {
        self.addons.insert(addon.id.clone(), addon);
        self
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalog {
    async fn plan(&self, id: &str) -> BillingResult<Option<Plan>> {
        Ok(self.plans.get(id).cloned())
    }

    async fn token_bundle(&self, id: &str) -> BillingResult<Option<TokenBundle>> {
        Ok(self.bundles.get(id).cloned())
    }

    async fn addon(&self, id: &str) -> BillingResult<Option<Addon>> {
        Ok(self.addons.get(id).cloned())
    }
}
