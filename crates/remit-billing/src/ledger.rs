//! Ledger state transitions.
//!
//! Every method that mutates state expects the caller to hold the user's
//! guard from [`Ledger::lock_user`], except [`Ledger::expire_due`] which
//! takes the guards itself.

use chrono::{DateTime, Duration, Utc};
use remit_core::{
    AddonChanged, EventPayload, InvariantViolation, LineItemKind, LineItemRequest, Money,
    SubscriptionChanged, TokensChanged,
};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::lock::UserLocks;
use crate::model::{
    AddonStatus, AddonSubscription, Invoice, InvoiceStatus, LineItem, PurchaseStatus,
    Subscription, SubscriptionStatus, TokenBundlePurchase, TokenSettlement, TokenTransaction,
    TokenTransactionKind,
};
use crate::report::ItemOutcome;
use crate::repository::Repositories;

/// The result of one line-item transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    /// `false` when the target state was already present.
    pub applied: bool,
    /// Follow-up events describing what changed.
    pub events: Vec<EventPayload>,
}

impl Effect {
    fn unchanged() -> Self {
        Self {
            applied: false,
            events: Vec::new(),
        }
    }

    fn applied(events: Vec<EventPayload>) -> Self {
        Self {
            applied: true,
            events,
        }
    }

    pub fn outcome(&self) -> ItemOutcome {
        if self.applied {
            ItemOutcome::Applied
        } else {
            ItemOutcome::AlreadyApplied
        }
    }
}

pub struct Ledger {
    repos: Repositories,
    locks: UserLocks,
}

impl Ledger {
    pub fn new(repos: Repositories) -> Self {
        Self {
            repos,
            locks: UserLocks::new(),
        }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub async fn lock_user(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        self.locks.lock(user_id).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn invoice(&self, id: Uuid) -> BillingResult<Invoice> {
        self.repos
            .invoices
            .find(id)
            .await?
            .ok_or(BillingError::InvoiceNotFound(id))
    }

    pub async fn invoices_for(&self, user_id: Uuid) -> BillingResult<Vec<Invoice>> {
        self.repos.invoices.list_for_user(user_id).await
    }

    pub async fn subscription(&self, id: Uuid) -> BillingResult<Subscription> {
        self.repos
            .subscriptions
            .find(id)
            .await?
            .ok_or(BillingError::SubscriptionNotFound(id))
    }

    pub async fn subscriptions_for(&self, user_id: Uuid) -> BillingResult<Vec<Subscription>> {
        self.repos.subscriptions.list_for_user(user_id).await
    }

    pub async fn active_subscription(&self, user_id: Uuid) -> BillingResult<Option<Subscription>> {
        let active: Vec<_> = self
            .subscriptions_for(user_id)
            .await?
            .into_iter()
            .filter(Subscription::is_active)
            .collect();
        match active.len() {
            0 | 1 => Ok(active.into_iter().next()),
            n => Err(Self::multiple_active(user_id, n).into()),
        }
    }

    pub async fn token_balance(&self, user_id: Uuid) -> BillingResult<u64> {
        Ok(self.repos.tokens.balance(user_id).await?.balance)
    }

    pub async fn token_transactions(&self, user_id: Uuid) -> BillingResult<Vec<TokenTransaction>> {
        self.repos.tokens.transactions(user_id).await
    }

    pub async fn addons_for(&self, user_id: Uuid) -> BillingResult<Vec<AddonSubscription>> {
        self.repos.addons.list_for_user(user_id).await
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Prices the requested items and persists a `Pending` invoice, plus a
    /// `Pending` subscription when a plan is among them.
    pub async fn open_invoice(
        &self,
        user_id: Uuid,
        items: &[LineItemRequest],
        now: DateTime<Utc>,
    ) -> BillingResult<Invoice> {
        if items.is_empty() {
            return Err(BillingError::EmptyCheckout);
        }
        let plans = items
            .iter()
            .filter(|i| i.kind == LineItemKind::Subscription)
            .count();
        if plans > 1 {
            return Err(BillingError::MultiplePlans);
        }

        let mut line_items = Vec::with_capacity(items.len());
        let mut total: Option<Money> = None;
        let mut subscription = None;
        for request in items {
            let amount = self.price(request).await?;
            total = Some(match total {
                Some(sum) => sum.checked_add(&amount)?,
                None => amount.clone(),
            });
            if request.kind == LineItemKind::Subscription {
                subscription = Some(Subscription::pending(
                    user_id,
                    request.reference_id.clone(),
                    now,
                ));
            }
            line_items.push(LineItem {
                id: Uuid::new_v4(),
                kind: request.kind,
                reference_id: request.reference_id.clone(),
                amount,
            });
        }
        let amount = total.ok_or(BillingError::EmptyCheckout)?;

        if let Some(sub) = &subscription {
            self.repos.subscriptions.save(sub).await?;
        }
        let invoice = Invoice {
            id: Uuid::new_v4(),
            user_id,
            invoice_number: Invoice::generate_number(now),
            amount,
            status: InvoiceStatus::Pending,
            subscription_id: subscription.as_ref().map(|s| s.id),
            line_items,
            provider: None,
            charge_id: None,
            created_at: now,
            paid_at: None,
            refunded_at: None,
            voided_at: None,
        };
        self.repos.invoices.save(&invoice).await?;

        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            user_id = %user_id,
            amount = %invoice.amount,
            items = invoice.line_items.len(),
            "Invoice opened"
        );
        Ok(invoice)
    }

    async fn price(&self, request: &LineItemRequest) -> BillingResult<Money> {
        let id = request.reference_id.as_str();
        let catalog = &self.repos.catalog;
        match request.kind {
            LineItemKind::Subscription => catalog
                .plan(id)
                .await?
                .map(|p| p.price)
                .ok_or_else(|| BillingError::PlanNotFound(id.into())),
            LineItemKind::TokenBundle => catalog
                .token_bundle(id)
                .await?
                .map(|b| b.price)
                .ok_or_else(|| BillingError::BundleNotFound(id.into())),
            LineItemKind::AddOn => catalog
                .addon(id)
                .await?
                .map(|a| a.price)
                .ok_or_else(|| BillingError::AddonNotFound(id.into())),
        }
    }

    // =========================================================================
    // Invoice status
    // =========================================================================

    /// `Pending → Paid`. Returns `false` when already `Paid`.
    pub async fn mark_paid(
        &self,
        invoice: &mut Invoice,
        provider: &str,
        charge_id: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<bool> {
        match invoice.status {
            InvoiceStatus::Pending => {
                invoice.status = InvoiceStatus::Paid;
                invoice.provider = Some(provider.to_string());
                invoice.charge_id = Some(charge_id.to_string());
                invoice.paid_at = Some(now);
                self.repos.invoices.save(invoice).await?;
                Ok(true)
            }
            InvoiceStatus::Paid => Ok(false),
            status => Err(BillingError::InvalidInvoiceState {
                invoice_id: invoice.id,
                status,
                action: "capture",
            }),
        }
    }

    /// Checks that a refund may be processed for `invoice`.
    pub fn ensure_refundable(&self, invoice: &Invoice) -> BillingResult<()> {
        match invoice.status {
            InvoiceStatus::Paid | InvoiceStatus::Refunded => Ok(()),
            status => Err(BillingError::InvalidInvoiceState {
                invoice_id: invoice.id,
                status,
                action: "refund",
            }),
        }
    }

    /// `Paid → Refunded`. Returns `false` when already `Refunded`.
    pub async fn mark_refunded(
        &self,
        invoice: &mut Invoice,
        now: DateTime<Utc>,
    ) -> BillingResult<bool> {
        self.ensure_refundable(invoice)?;
        if invoice.status == InvoiceStatus::Refunded {
            return Ok(false);
        }
        invoice.status = InvoiceStatus::Refunded;
        invoice.refunded_at = Some(now);
        self.repos.invoices.save(invoice).await?;
        Ok(true)
    }

    /// `Pending → Void`. Returns `false` when already `Void`.
    pub async fn mark_void(&self, invoice: &mut Invoice, now: DateTime<Utc>) -> BillingResult<bool> {
        match invoice.status {
            InvoiceStatus::Pending => {
                invoice.status = InvoiceStatus::Void;
                invoice.voided_at = Some(now);
                self.repos.invoices.save(invoice).await?;
                Ok(true)
            }
            InvoiceStatus::Void => Ok(false),
            status => Err(BillingError::InvalidInvoiceState {
                invoice_id: invoice.id,
                status,
                action: "void",
            }),
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Activates the invoice's pending subscription, cancelling any other
    /// active subscription of the same user first.
    ///
    /// A subscription that is already active, or that was superseded after
    /// activation, is left untouched.
    pub async fn activate_subscription(
        &self,
        invoice: &Invoice,
        now: DateTime<Utc>,
    ) -> BillingResult<Effect> {
        let sub_id = invoice
            .subscription_id
            .ok_or(BillingError::NoSubscriptionLinked(invoice.id))?;
        let mut sub = self.subscription(sub_id).await?;
        if sub.user_id != invoice.user_id {
            return Err(InvariantViolation::new(format!(
                "subscription {} belongs to user {}, invoice {} to user {}",
                sub.id, sub.user_id, invoice.id, invoice.user_id
            ))
            .into());
        }

        if sub.status != SubscriptionStatus::Pending {
            debug!(subscription_id = %sub.id, status = %sub.status, "Subscription activation already applied");
            return Ok(Effect::unchanged());
        }

        let plan = self
            .repos
            .catalog
            .plan(&sub.plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound(sub.plan_id.clone()))?;

        let mut events = Vec::new();
        for mut other in self.subscriptions_for(sub.user_id).await? {
            if other.id == sub.id || !other.is_active() {
                continue;
            }
            other.status = SubscriptionStatus::Cancelled;
            other.cancelled_at = Some(now);
            self.repos.subscriptions.save(&other).await?;
            info!(subscription_id = %other.id, user_id = %other.user_id, "Previous subscription cancelled");
            events.push(EventPayload::SubscriptionCancelled(SubscriptionChanged {
                user_id: other.user_id,
                subscription_id: other.id,
                plan_id: other.plan_id.clone(),
                invoice_id: None,
            }));
        }

        sub.status = SubscriptionStatus::Active;
        sub.started_at = Some(now);
        sub.expires_at = Some(now + Duration::days(i64::from(plan.duration_days)));
        self.repos.subscriptions.save(&sub).await?;
        self.assert_single_active(sub.user_id).await?;

        info!(
            subscription_id = %sub.id,
            user_id = %sub.user_id,
            plan_id = %sub.plan_id,
            expires_at = ?sub.expires_at,
            "Subscription activated"
        );
        events.push(EventPayload::SubscriptionActivated(SubscriptionChanged {
            user_id: sub.user_id,
            subscription_id: sub.id,
            plan_id: sub.plan_id.clone(),
            invoice_id: Some(invoice.id),
        }));
        Ok(Effect::applied(events))
    }

    /// Cancels the invoice's subscription.
    pub async fn cancel_subscription(
        &self,
        invoice: &Invoice,
        now: DateTime<Utc>,
    ) -> BillingResult<Effect> {
        let sub_id = invoice
            .subscription_id
            .ok_or(BillingError::NoSubscriptionLinked(invoice.id))?;
        let mut sub = self.subscription(sub_id).await?;
        match sub.status {
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired => {
                return Ok(Effect::unchanged());
            }
            SubscriptionStatus::Pending | SubscriptionStatus::Active => {}
        }
        sub.status = SubscriptionStatus::Cancelled;
        sub.cancelled_at = Some(now);
        self.repos.subscriptions.save(&sub).await?;
        info!(subscription_id = %sub.id, user_id = %sub.user_id, "Subscription cancelled");

        Ok(Effect::applied(vec![EventPayload::SubscriptionCancelled(
            SubscriptionChanged {
                user_id: sub.user_id,
                subscription_id: sub.id,
                plan_id: sub.plan_id,
                invoice_id: Some(invoice.id),
            },
        )]))
    }

    /// Marks every due active subscription `Expired`.
    ///
    /// Driven by `subscription.expiry_due`; takes each user's guard itself.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> BillingResult<Vec<EventPayload>> {
        let due: Vec<_> = self
            .repos
            .subscriptions
            .list_active()
            .await?
            .into_iter()
            .filter(|s| s.is_due(now))
            .collect();

        let mut events = Vec::new();
        for candidate in due {
            let _guard = self.lock_user(candidate.user_id).await;
            let mut sub = self.subscription(candidate.id).await?;
            if !sub.is_due(now) {
                continue;
            }
            sub.status = SubscriptionStatus::Expired;
            self.repos.subscriptions.save(&sub).await?;
            info!(subscription_id = %sub.id, user_id = %sub.user_id, "Subscription expired");
            events.push(EventPayload::SubscriptionExpired(SubscriptionChanged {
                user_id: sub.user_id,
                subscription_id: sub.id,
                plan_id: sub.plan_id,
                invoice_id: None,
            }));
        }
        Ok(events)
    }

    async fn assert_single_active(&self, user_id: Uuid) -> BillingResult<()> {
        let active = self
            .subscriptions_for(user_id)
            .await?
            .iter()
            .filter(|s| s.is_active())
            .count();
        if active > 1 {
            let violation = Self::multiple_active(user_id, active);
            error!(user_id = %user_id, active, "{violation}");
            return Err(violation.into());
        }
        Ok(())
    }

    fn multiple_active(user_id: Uuid, count: usize) -> InvariantViolation {
        InvariantViolation::new(format!(
            "user {user_id} has {count} active subscriptions"
        ))
    }

    /// Voids the invoice's subscription if it never became active.
    pub async fn void_pending_subscription(
        &self,
        invoice: &Invoice,
        now: DateTime<Utc>,
    ) -> BillingResult<Effect> {
        let Some(sub_id) = invoice.subscription_id else {
            return Ok(Effect::unchanged());
        };
        let sub = self.subscription(sub_id).await?;
        if sub.status != SubscriptionStatus::Pending {
            return Ok(Effect::unchanged());
        }
        self.cancel_subscription(invoice, now).await
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    /// Credits the bundle bought by `item`.
    pub async fn credit_bundle(
        &self,
        invoice: &Invoice,
        item: &LineItem,
        now: DateTime<Utc>,
    ) -> BillingResult<Effect> {
        if self.repos.tokens.find_purchase(item.id).await?.is_some() {
            return Ok(Effect::unchanged());
        }
        let bundle = self
            .repos
            .catalog
            .token_bundle(&item.reference_id)
            .await?
            .ok_or_else(|| BillingError::BundleNotFound(item.reference_id.clone()))?;

        let mut balance = self.repos.tokens.balance(invoice.user_id).await?;
        balance.credit(bundle.tokens);
        self.repos
            .tokens
            .settle(&TokenSettlement {
                balance: balance.clone(),
                transaction: TokenTransaction {
                    id: Uuid::new_v4(),
                    user_id: invoice.user_id,
                    kind: TokenTransactionKind::Credit,
                    amount: bundle.tokens,
                    requested: bundle.tokens,
                    shortfall: 0,
                    invoice_id: invoice.id,
                    line_item_id: item.id,
                    created_at: now,
                },
                purchase: TokenBundlePurchase {
                    id: Uuid::new_v4(),
                    user_id: invoice.user_id,
                    bundle_id: bundle.id.clone(),
                    invoice_id: invoice.id,
                    line_item_id: item.id,
                    tokens: bundle.tokens,
                    status: PurchaseStatus::Completed,
                    created_at: now,
                    refunded_at: None,
                },
            })
            .await?;

        info!(
            user_id = %invoice.user_id,
            bundle_id = %bundle.id,
            tokens = bundle.tokens,
            balance = balance.balance,
            "Tokens credited"
        );
        Ok(Effect::applied(vec![EventPayload::TokensCredited(
            TokensChanged {
                user_id: invoice.user_id,
                invoice_id: invoice.id,
                amount: bundle.tokens,
                shortfall: 0,
                balance: balance.balance,
            },
        )]))
    }

    /// Reverses the credit made for `item`, clamping the balance at zero.
    ///
    /// Tokens already spent cannot be taken back; the uncollected part is
    /// recorded as the transaction's shortfall.
    pub async fn debit_bundle(
        &self,
        invoice: &Invoice,
        item: &LineItem,
        now: DateTime<Utc>,
    ) -> BillingResult<Effect> {
        let mut purchase = self
            .repos
            .tokens
            .find_purchase(item.id)
            .await?
            .ok_or(BillingError::PurchaseNotFound(item.id))?;
        if purchase.status == PurchaseStatus::Refunded {
            return Ok(Effect::unchanged());
        }

        let mut balance = self.repos.tokens.balance(invoice.user_id).await?;
        let (applied, shortfall) = balance.debit(purchase.tokens);
        purchase.status = PurchaseStatus::Refunded;
        purchase.refunded_at = Some(now);
        self.repos
            .tokens
            .settle(&TokenSettlement {
                balance: balance.clone(),
                transaction: TokenTransaction {
                    id: Uuid::new_v4(),
                    user_id: invoice.user_id,
                    kind: TokenTransactionKind::Debit,
                    amount: applied,
                    requested: purchase.tokens,
                    shortfall,
                    invoice_id: invoice.id,
                    line_item_id: item.id,
                    created_at: now,
                },
                purchase: purchase.clone(),
            })
            .await?;

        if shortfall > 0 {
            warn!(
                user_id = %invoice.user_id,
                requested = purchase.tokens,
                debited = applied,
                shortfall,
                "Token refund clamped at zero balance"
            );
        } else {
            info!(user_id = %invoice.user_id, tokens = applied, "Tokens debited");
        }
        Ok(Effect::applied(vec![EventPayload::TokensDebited(
            TokensChanged {
                user_id: invoice.user_id,
                invoice_id: invoice.id,
                amount: applied,
                shortfall,
                balance: balance.balance,
            },
        )]))
    }

    // =========================================================================
    // Add-ons
    // =========================================================================

    pub async fn activate_addon(
        &self,
        invoice: &Invoice,
        item: &LineItem,
        now: DateTime<Utc>,
    ) -> BillingResult<Effect> {
        if self.repos.addons.find_by_line_item(item.id).await?.is_some() {
            return Ok(Effect::unchanged());
        }
        let addon = self
            .repos
            .catalog
            .addon(&item.reference_id)
            .await?
            .ok_or_else(|| BillingError::AddonNotFound(item.reference_id.clone()))?;

        let record = AddonSubscription {
            id: Uuid::new_v4(),
            user_id: invoice.user_id,
            addon_id: addon.id,
            subscription_id: invoice.subscription_id,
            invoice_id: invoice.id,
            line_item_id: item.id,
            status: AddonStatus::Active,
            activated_at: now,
            cancelled_at: None,
        };
        self.repos.addons.save(&record).await?;
        info!(user_id = %record.user_id, addon_id = %record.addon_id, "Add-on activated");

        Ok(Effect::applied(vec![EventPayload::AddonActivated(
            AddonChanged {
                user_id: record.user_id,
                addon_subscription_id: record.id,
                addon_id: record.addon_id,
                invoice_id: invoice.id,
            },
        )]))
    }

    pub async fn cancel_addon(
        &self,
        invoice: &Invoice,
        item: &LineItem,
        now: DateTime<Utc>,
    ) -> BillingResult<Effect> {
        let mut record = self
            .repos
            .addons
            .find_by_line_item(item.id)
            .await?
            .ok_or(BillingError::AddonSubscriptionNotFound(item.id))?;
        if record.status == AddonStatus::Cancelled {
            return Ok(Effect::unchanged());
        }
        record.status = AddonStatus::Cancelled;
        record.cancelled_at = Some(now);
        self.repos.addons.save(&record).await?;
        info!(user_id = %record.user_id, addon_id = %record.addon_id, "Add-on cancelled");

        Ok(Effect::applied(vec![EventPayload::AddonCancelled(
            AddonChanged {
                user_id: record.user_id,
                addon_subscription_id: record.id,
                addon_id: record.addon_id,
                invoice_id: invoice.id,
            },
        )]))
    }
}
