//! Retries and idempotency keys around payment provider calls.

mod common;

use remit_billing::InvoiceStatus;
use remit_core::{LineItemRequest, ProviderError};
use remit_provider_mock::MOCK_PROVIDER_NAME;
use remit_runtime::{RemitConfig, RuntimeError};
use uuid::Uuid;

use common::{TestRuntime, runtime_with};

fn fast_retries(max_retries: u32) -> RemitConfig {
    let mut config = RemitConfig::default();
    config.payments.max_retries = max_retries;
    config.payments.retry_base_delay_ms = 1;
    config
}

async fn pending_invoice(t: &TestRuntime) -> Uuid {
    t.runtime
        .checkout(
            Uuid::new_v4(),
            vec![
                LineItemRequest::plan("pro_monthly"),
                LineItemRequest::token_bundle("tokens_100"),
            ],
        )
        .await
        .unwrap()
        .receipt
        .invoice_id
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_paid() {
    let t = runtime_with(fast_retries(3)).await;
    let invoice_id = pending_invoice(&t).await;

    t.provider.fail_transiently(2);
    let report = t
        .runtime
        .pay_invoice(invoice_id, MOCK_PROVIDER_NAME, "buyer@example.com")
        .await
        .unwrap();
    assert!(report.is_fully_successful());

    assert_eq!(
        t.provider.calls(),
        vec![
            "create_customer",
            "create_customer",
            "create_customer",
            "create_charge",
            "capture_payment",
        ]
    );
    assert_eq!(t.provider.charges().len(), 1);
    assert_eq!(
        t.runtime.ledger().invoice(invoice_id).await.unwrap().status,
        InvoiceStatus::Paid
    );
}

#[tokio::test]
async fn test_exhausted_retries_leave_invoice_pending() {
    let t = runtime_with(fast_retries(1)).await;
    let invoice_id = pending_invoice(&t).await;

    t.provider.fail_transiently(5);
    let err = t
        .runtime
        .pay_invoice(invoice_id, MOCK_PROVIDER_NAME, "buyer@example.com")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Provider(ProviderError::Unavailable(_))
    ));
    assert_eq!(t.provider.calls().len(), 2);

    // A transient failure is not a decline: the invoice can still be paid.
    assert_eq!(
        t.runtime.ledger().invoice(invoice_id).await.unwrap().status,
        InvoiceStatus::Pending
    );
    assert!(t.notifier.events().is_empty());

    t.provider.fail_transiently(0);
    t.runtime
        .pay_invoice(invoice_id, MOCK_PROVIDER_NAME, "buyer@example.com")
        .await
        .unwrap();
    assert_eq!(t.provider.charges().len(), 1);
}

#[tokio::test]
async fn test_repeated_payment_charges_once() {
    let t = runtime_with(fast_retries(3)).await;
    let invoice_id = pending_invoice(&t).await;

    for _ in 0..2 {
        let report = t
            .runtime
            .pay_invoice(invoice_id, MOCK_PROVIDER_NAME, "buyer@example.com")
            .await
            .unwrap();
        assert!(report.is_fully_successful());
    }

    assert_eq!(t.provider.customers().len(), 1);
    assert_eq!(t.provider.charges().len(), 1);
    assert_eq!(t.provider.calls().len(), 3);

    let invoice = t.runtime.ledger().invoice(invoice_id).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(
        invoice.charge_id.as_deref(),
        Some(t.provider.charges()[0].charge_id.as_str())
    );
}

#[tokio::test]
async fn test_provider_refund_is_retried() {
    let t = runtime_with(fast_retries(2)).await;
    let invoice_id = pending_invoice(&t).await;
    t.runtime
        .pay_invoice(invoice_id, MOCK_PROVIDER_NAME, "buyer@example.com")
        .await
        .unwrap();

    t.provider.fail_transiently(1);
    let report = t.runtime.refund_through_provider(invoice_id).await.unwrap();
    assert!(report.is_fully_successful());
    assert_eq!(t.provider.refunds().len(), 1);
    assert_eq!(
        t.provider.calls().iter().filter(|c| *c == "refund").count(),
        2
    );
    assert_eq!(
        t.runtime.ledger().invoice(invoice_id).await.unwrap().status,
        InvoiceStatus::Refunded
    );
}
