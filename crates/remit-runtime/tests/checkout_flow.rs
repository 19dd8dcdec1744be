//! End-to-end checkout, capture and refund through the runtime.

mod common;

use chrono::{Duration, Utc};
use remit_billing::{
    AddonStatus, BillingError, InvoiceStatus, ItemOutcome, PaymentCapturedHandler,
    SettlementReport, SubscriptionStatus, TokenTransactionKind,
};
use remit_core::{EventKind, LineItemRequest, ProviderError};
use remit_provider_mock::MOCK_PROVIDER_NAME;
use remit_runtime::RuntimeError;
use uuid::Uuid;

use common::{runtime, usd};

#[tokio::test]
async fn test_token_only_checkout_creates_no_subscription() {
    let t = runtime().await;
    let user = Uuid::new_v4();

    let checkout = t
        .runtime
        .checkout(user, vec![LineItemRequest::token_bundle("tokens_100")])
        .await
        .unwrap();
    assert_eq!(checkout.receipt.subscription_id, None);
    assert_eq!(checkout.receipt.amount, usd(500));

    let invoice_id = checkout.receipt.invoice_id;
    let invoice = t.runtime.ledger().invoice(invoice_id).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Pending);
    assert!(invoice.subscription_id.is_none());

    let report = t.runtime.capture(invoice_id, MOCK_PROVIDER_NAME, "ch_ext_1").await;
    assert!(report.is_fully_successful());
    assert_eq!(report.follow_up_kinds(), vec![EventKind::TokensCredited]);

    let ledger = t.runtime.ledger();
    assert_eq!(ledger.token_balance(user).await.unwrap(), 100);
    assert!(ledger.subscriptions_for(user).await.unwrap().is_empty());
    assert_eq!(
        ledger.invoice(invoice_id).await.unwrap().status,
        InvoiceStatus::Paid
    );
}

#[tokio::test]
async fn test_empty_checkout_is_rejected() {
    let t = runtime().await;
    let err = t.runtime.checkout(Uuid::new_v4(), vec![]).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Billing(BillingError::EmptyCheckout)));
}

#[tokio::test]
async fn test_unknown_catalog_item_fails_checkout() {
    let t = runtime().await;
    let err = t
        .runtime
        .checkout(Uuid::new_v4(), vec![LineItemRequest::plan("enterprise")])
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::HandlerFailed { .. }));
}

#[tokio::test]
async fn test_plan_switch_leaves_one_active_subscription() {
    let t = runtime().await;
    let user = Uuid::new_v4();

    let first = t
        .runtime
        .checkout(user, vec![LineItemRequest::plan("pro_monthly")])
        .await
        .unwrap();
    t.runtime
        .capture(first.receipt.invoice_id, MOCK_PROVIDER_NAME, "ch_a")
        .await;

    let second = t
        .runtime
        .checkout(user, vec![LineItemRequest::plan("team_monthly")])
        .await
        .unwrap();
    let report = t
        .runtime
        .capture(second.receipt.invoice_id, MOCK_PROVIDER_NAME, "ch_b")
        .await;
    assert!(report.is_fully_successful());
    assert!(
        report
            .follow_up_kinds()
            .contains(&EventKind::SubscriptionCancelled)
    );

    let ledger = t.runtime.ledger();
    let active = ledger.active_subscription(user).await.unwrap().unwrap();
    assert_eq!(active.plan_id, "team_monthly");
    assert_eq!(Some(active.id), second.receipt.subscription_id);

    let plan_a = ledger
        .subscription(first.receipt.subscription_id.unwrap())
        .await
        .unwrap();
    assert_eq!(plan_a.status, SubscriptionStatus::Cancelled);

    let actives = ledger
        .subscriptions_for(user)
        .await
        .unwrap()
        .into_iter()
        .filter(|s| s.status == SubscriptionStatus::Active)
        .count();
    assert_eq!(actives, 1);
}

#[tokio::test]
async fn test_duplicate_capture_is_idempotent() {
    let t = runtime().await;
    let user = Uuid::new_v4();
    let checkout = t
        .runtime
        .checkout(
            user,
            vec![
                LineItemRequest::plan("pro_monthly"),
                LineItemRequest::token_bundle("tokens_100"),
                LineItemRequest::add_on("priority_support"),
            ],
        )
        .await
        .unwrap();
    let invoice_id = checkout.receipt.invoice_id;

    let first = t.runtime.capture(invoice_id, MOCK_PROVIDER_NAME, "ch_1").await;
    assert!(first.is_fully_successful());
    let second = t.runtime.capture(invoice_id, MOCK_PROVIDER_NAME, "ch_1").await;
    assert!(second.is_fully_successful());
    assert!(second.follow_ups.is_empty());

    let data: SettlementReport =
        serde_json::from_value(second.data(PaymentCapturedHandler::NAME).unwrap().clone())
            .unwrap();
    assert!(!data.status_written);
    assert_eq!(data.items.len(), 3);
    assert_eq!(data.count(&ItemOutcome::AlreadyApplied), 3);

    let ledger = t.runtime.ledger();
    assert_eq!(ledger.token_balance(user).await.unwrap(), 100);
    assert_eq!(ledger.token_transactions(user).await.unwrap().len(), 1);
    assert_eq!(ledger.addons_for(user).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_refund_through_provider_reverses_every_item() {
    let t = runtime().await;
    let user = Uuid::new_v4();
    let checkout = t
        .runtime
        .checkout(
            user,
            vec![
                LineItemRequest::plan("pro_monthly"),
                LineItemRequest::token_bundle("tokens_100"),
                LineItemRequest::add_on("priority_support"),
            ],
        )
        .await
        .unwrap();
    let invoice_id = checkout.receipt.invoice_id;
    assert_eq!(checkout.receipt.amount, usd(1999 + 500 + 300));

    let captured = t
        .runtime
        .pay_invoice(invoice_id, MOCK_PROVIDER_NAME, "buyer@example.com")
        .await
        .unwrap();
    assert!(captured.is_fully_successful());

    let invoice = t.runtime.ledger().invoice(invoice_id).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    let charge_id = invoice.charge_id.clone().unwrap();
    assert_eq!(t.provider.charge(&charge_id).unwrap().amount, usd(2799));

    let refunded = t.runtime.refund_through_provider(invoice_id).await.unwrap();
    assert!(refunded.is_fully_successful());
    assert_eq!(t.provider.refunds().len(), 1);

    let ledger = t.runtime.ledger();
    assert_eq!(
        ledger.invoice(invoice_id).await.unwrap().status,
        InvoiceStatus::Refunded
    );
    let subscription = ledger
        .subscription(checkout.receipt.subscription_id.unwrap())
        .await
        .unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Cancelled);
    assert!(ledger.active_subscription(user).await.unwrap().is_none());
    assert_eq!(ledger.token_balance(user).await.unwrap(), 0);
    let addons = ledger.addons_for(user).await.unwrap();
    assert_eq!(addons[0].status, AddonStatus::Cancelled);

    // A second provider refund is refused before the provider is called.
    let err = t
        .runtime
        .refund_through_provider(invoice_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Billing(BillingError::InvalidInvoiceState { .. })
    ));
    assert_eq!(t.provider.refunds().len(), 1);
}

#[tokio::test]
async fn test_refund_clamps_spent_tokens_and_records_shortfall() {
    let t = runtime().await;
    let user = Uuid::new_v4();
    let checkout = t
        .runtime
        .checkout(user, vec![LineItemRequest::token_bundle("tokens_100")])
        .await
        .unwrap();
    let invoice_id = checkout.receipt.invoice_id;
    t.runtime.capture(invoice_id, MOCK_PROVIDER_NAME, "ch_1").await;

    // The user spends 70 of the credited tokens.
    let tokens = &t.runtime.ledger().repositories().tokens;
    let mut balance = tokens.balance(user).await.unwrap();
    balance.debit(70);
    tokens.save_balance(&balance).await.unwrap();

    let report = t.runtime.refund(invoice_id).await;
    assert!(report.is_fully_successful());

    let ledger = t.runtime.ledger();
    assert_eq!(ledger.token_balance(user).await.unwrap(), 0);
    let debit = ledger
        .token_transactions(user)
        .await
        .unwrap()
        .into_iter()
        .find(|tx| tx.kind == TokenTransactionKind::Debit)
        .unwrap();
    assert_eq!(debit.requested, 100);
    assert_eq!(debit.amount, 30);
    assert_eq!(debit.shortfall, 70);
}

#[tokio::test]
async fn test_declined_payment_voids_invoice() {
    let t = runtime().await;
    let user = Uuid::new_v4();
    let checkout = t
        .runtime
        .checkout(user, vec![LineItemRequest::plan("pro_monthly")])
        .await
        .unwrap();
    let invoice_id = checkout.receipt.invoice_id;

    t.provider.set_should_fail(true);
    let err = t
        .runtime
        .pay_invoice(invoice_id, MOCK_PROVIDER_NAME, "buyer@example.com")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Provider(ProviderError::Declined(_))
    ));

    let ledger = t.runtime.ledger();
    assert_eq!(
        ledger.invoice(invoice_id).await.unwrap().status,
        InvoiceStatus::Void
    );
    let subscription = ledger
        .subscription(checkout.receipt.subscription_id.unwrap())
        .await
        .unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Cancelled);
}

#[tokio::test]
async fn test_unknown_provider_is_unavailable() {
    let t = runtime().await;
    let err = t
        .runtime
        .pay_invoice(Uuid::new_v4(), "stripe", "buyer@example.com")
        .await
        .unwrap_err();
    // The invoice lookup runs first.
    assert!(matches!(
        err,
        RuntimeError::Billing(BillingError::InvoiceNotFound(_))
    ));

    let checkout = t
        .runtime
        .checkout(Uuid::new_v4(), vec![LineItemRequest::add_on("priority_support")])
        .await
        .unwrap();
    let err = t
        .runtime
        .pay_invoice(checkout.receipt.invoice_id, "stripe", "buyer@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ProviderUnavailable(ref name) if name == "stripe"));
}

#[tokio::test]
async fn test_expire_subscriptions_publishes_and_notifies() {
    let t = runtime().await;
    let user = Uuid::new_v4();
    let checkout = t
        .runtime
        .checkout(user, vec![LineItemRequest::plan("pro_monthly")])
        .await
        .unwrap();
    t.runtime
        .capture(checkout.receipt.invoice_id, MOCK_PROVIDER_NAME, "ch_1")
        .await;

    let none = t.runtime.expire_subscriptions(Utc::now()).await.unwrap();
    assert_eq!(none.kind, EventKind::SubscriptionExpiryDue);
    assert!(none.follow_ups.is_empty());

    let report = t
        .runtime
        .expire_subscriptions(Utc::now() + Duration::days(31))
        .await
        .unwrap();
    assert!(report.is_fully_successful());
    assert_eq!(report.follow_up_kinds(), vec![EventKind::SubscriptionExpired]);
    assert_eq!(
        t.notifier.kinds().last(),
        Some(&EventKind::SubscriptionExpired)
    );

    let subscription = t
        .runtime
        .ledger()
        .subscription(checkout.receipt.subscription_id.unwrap())
        .await
        .unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Expired);
}
