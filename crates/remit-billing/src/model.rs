//! Ledger entities.
//!
//! These are owned by the state machine: they change only inside event
//! handlers, never from request-handling code.

use std::fmt;

use chrono::{DateTime, Utc};
use remit_core::{LineItemKind, Money};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Invoice
// =============================================================================

/// ```text
/// Pending ──► Paid ──► Refunded
///    └──────► Void
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Refunded,
    Void,
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Refunded => "refunded",
            Self::Void => "void",
        })
    }
}

/// One typed, priced component of an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: Uuid,
    pub kind: LineItemKind,
    pub reference_id: String,
    pub amount: Money,
}

/// An invoice. Append-only: never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub invoice_number: String,
    pub amount: Money,
    pub status: InvoiceStatus,
    /// Set only when the checkout contained a plan.
    pub subscription_id: Option<Uuid>,
    pub line_items: Vec<LineItem>,
    pub provider: Option<String>,
    pub charge_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
}

impl Invoice {
    /// `INV-<yyyymmddhhmmss>-<6 hex>`.
    pub fn generate_number(now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "INV-{}-{}",
            now.format("%Y%m%d%H%M%S"),
            suffix[..6].to_ascii_uppercase()
        )
    }

    pub fn has_plan(&self) -> bool {
        self.line_items
            .iter()
            .any(|i| i.kind == LineItemKind::Subscription)
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// ```text
/// Pending ──► Active ──► Cancelled | Expired
///    └──────────────────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn pending(user_id: Uuid, plan_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id: plan_id.into(),
            status: SubscriptionStatus::Pending,
            created_at: now,
            started_at: None,
            expires_at: None,
            cancelled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|at| at <= now)
    }
}

// =============================================================================
// Tokens
// =============================================================================

/// A user's token balance. Unsigned: it cannot go below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub user_id: Uuid,
    pub balance: u64,
}

impl TokenBalance {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            balance: 0,
        }
    }

    pub fn credit(&mut self, amount: u64) {
        self.balance = self.balance.saturating_add(amount);
    }

    /// Debits up to `amount`, clamping at zero.
    ///
    /// Returns `(applied, shortfall)` where `applied + shortfall == amount`.
    pub fn debit(&mut self, amount: u64) -> (u64, u64) {
        let applied = amount.min(self.balance);
        self.balance -= applied;
        (applied, amount - applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTransactionKind {
    Credit,
    Debit,
}

/// Audit record of a balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TokenTransactionKind,
    /// Tokens actually moved.
    pub amount: u64,
    /// Tokens the operation asked to move.
    pub requested: u64,
    /// `requested - amount`; non-zero only for clamped debits.
    pub shortfall: u64,
    pub invoice_id: Uuid,
    pub line_item_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Completed,
    Refunded,
}

/// A credited token bundle, keyed by the line item that paid for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundlePurchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub bundle_id: String,
    pub invoice_id: Uuid,
    pub line_item_id: Uuid,
    /// Tokens credited by the purchase.
    pub tokens: u64,
    pub status: PurchaseStatus,
    pub created_at: DateTime<Utc>,
    pub refunded_at: Option<DateTime<Utc>>,
}

/// One bundle movement: the resulting balance, its audit entry and the
/// purchase record that marks the line item settled.
///
/// Repositories store a settlement as a unit. The purchase record is the
/// idempotency marker, so it must never exist without the balance change or
/// the other way round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSettlement {
    pub balance: TokenBalance,
    pub transaction: TokenTransaction,
    pub purchase: TokenBundlePurchase,
}

// =============================================================================
// Add-ons
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonStatus {
    Active,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub addon_id: String,
    /// `None` for add-ons bought without a plan.
    pub subscription_id: Option<Uuid>,
    pub invoice_id: Uuid,
    pub line_item_id: Uuid,
    pub status: AddonStatus,
    pub activated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price: Money,
    pub duration_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub id: String,
    pub name: String,
    pub tokens: u64,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addon {
    pub id: String,
    pub name: String,
    pub price: Money,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debit_clamps_at_zero() {
        let mut balance = TokenBalance::empty(Uuid::new_v4());
        balance.credit(100);
        assert_eq!(balance.debit(30), (30, 0));
        assert_eq!(balance.debit(500), (70, 430));
        assert_eq!(balance.balance, 0);
        assert_eq!(balance.debit(1), (0, 1));
    }

    #[test]
    fn test_invoice_number_shape() {
        let now = Utc::now();
        let number = Invoice::generate_number(now);
        let parts: Vec<_> = number.split('-').collect();
        assert_eq!(parts[0], "INV");
        assert_eq!(parts[1].len(), 14);
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
