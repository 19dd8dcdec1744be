//! Checkout Demo
//!
//! Walks one user through the full billing flow against the mock provider:
//!
//! ```text
//! checkout ──► invoice Pending
//!   charge + capture at the provider
//!   signed `payment.succeeded` webhook ──► invoice Paid, plan/tokens/add-on active
//!   provider refund ──► invoice Refunded, everything reversed
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package remit-checkout-demo
//! cargo run --package remit-checkout-demo -- --config remit.toml --skip-refund
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use remit::billing::Ledger;
use remit::core::WebhookEventKind;
use remit::mock::{MOCK_PROVIDER_NAME, MockPaymentProvider, WebhookPayload};
use remit::prelude::*;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(about = "Run one checkout through the Remit billing core")]
struct Args {
    /// Configuration file; defaults to remit.toml in the current directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Email registered with the payment provider.
    #[arg(long, default_value = "demo@example.com")]
    email: String,

    /// Stop after the capture.
    #[arg(long)]
    skip_refund: bool,
}

fn catalog() -> Result<InMemoryCatalog> {
    let usd = |minor| Money::new(minor, "USD");
    Ok(InMemoryCatalog::new()
        .with_plan(Plan {
            id: "pro_monthly".into(),
            name: "Pro".into(),
            price: usd(1999)?,
            duration_days: 30,
        })
        .with_token_bundle(TokenBundle {
            id: "tokens_500".into(),
            name: "500 tokens".into(),
            tokens: 500,
            price: usd(900)?,
        })
        .with_addon(Addon {
            id: "priority_support".into(),
            name: "Priority support".into(),
            price: usd(300)?,
        }))
}

async fn log_state(ledger: &Ledger, user_id: Uuid, invoice_id: Uuid) -> Result<()> {
    let invoice = ledger.invoice(invoice_id).await?;
    let plan = ledger
        .active_subscription(user_id)
        .await?
        .map(|s| s.plan_id)
        .unwrap_or_else(|| "none".into());
    let tokens = ledger.token_balance(user_id).await?;
    let addons: Vec<String> = ledger
        .addons_for(user_id)
        .await?
        .into_iter()
        .map(|a| format!("{}={:?}", a.addon_id, a.status))
        .collect();

    info!(
        invoice = %invoice.invoice_number,
        status = %invoice.status,
        active_plan = %plan,
        tokens,
        addons = ?addons,
        "Ledger state"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = BillingRuntime::builder().catalog(catalog()?);
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    let runtime = builder.build()?;

    // Keep a typed handle so the demo can sign webhooks as the provider would.
    let provider = Arc::new(MockPaymentProvider::new());
    runtime
        .install_plugin(
            remit::mock::descriptor(),
            remit::mock::shared_factory(provider.clone()),
        )
        .await?;

    let user_id = Uuid::new_v4();
    let checkout = runtime
        .checkout(
            user_id,
            vec![
                LineItemRequest::plan("pro_monthly"),
                LineItemRequest::token_bundle("tokens_500"),
                LineItemRequest::add_on("priority_support"),
            ],
        )
        .await?;
    let invoice_id = checkout.receipt.invoice_id;
    info!(
        invoice = %checkout.receipt.invoice_number,
        amount = %checkout.receipt.amount,
        "Checkout opened"
    );

    // Client side: charge and capture at the provider.
    let gateway = runtime.payment_provider(MOCK_PROVIDER_NAME)?;
    let customer = gateway.create_customer(&args.email).await?;
    let charge = gateway
        .create_charge(&checkout.receipt.amount, &customer)
        .await?;
    let captured = gateway.capture_payment(&charge.charge_id).await?;
    info!(charge_id = %captured.charge_id, status = ?captured.status, "Charge captured");

    // Provider side: deliver the signed webhook.
    let body = WebhookPayload::new("evt_demo_capture", WebhookEventKind::PaymentSucceeded)
        .charge(&captured.charge_id)
        .invoice(invoice_id)
        .amount(&captured.amount)
        .to_bytes()?;
    let signature = provider.sign(&body)?;
    let outcome = runtime
        .ingest_webhook(MOCK_PROVIDER_NAME, &body, &signature)
        .await?;
    let report = outcome.report().context("capture webhook was ignored")?;
    if !report.is_fully_successful() {
        for (handler, error) in report.failures() {
            tracing::error!(handler, error = %error, "Settlement failed");
        }
        bail!("capture did not settle cleanly");
    }
    info!(follow_ups = ?report.follow_up_kinds(), "Capture settled");
    log_state(runtime.ledger(), user_id, invoice_id).await?;

    if !args.skip_refund {
        let report = runtime.refund_through_provider(invoice_id).await?;
        info!(follow_ups = ?report.follow_up_kinds(), "Refund settled");
        log_state(runtime.ledger(), user_id, invoice_id).await?;
    }

    runtime.shutdown().await;
    Ok(())
}
