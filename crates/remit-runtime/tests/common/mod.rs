#![allow(dead_code)]

use std::sync::Arc;

use remit_billing::{Addon, InMemoryCatalog, Plan, RecordingNotifier, TokenBundle};
use remit_core::Money;
use remit_provider_mock::{self as mock, MockPaymentProvider};
use remit_runtime::{BillingRuntime, RemitConfig};

pub fn usd(minor: i64) -> Money {
    Money::new(minor, "USD").unwrap()
}

pub fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_plan(Plan {
            id: "pro_monthly".into(),
            name: "Pro".into(),
            price: usd(1999),
            duration_days: 30,
        })
        .with_plan(Plan {
            id: "team_monthly".into(),
            name: "Team".into(),
            price: usd(4999),
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
        })
}

pub struct TestRuntime {
    pub runtime: BillingRuntime,
    pub provider: Arc<MockPaymentProvider>,
    pub notifier: Arc<RecordingNotifier>,
}

/// A runtime with the mock provider installed and enabled.
pub async fn runtime() -> TestRuntime {
    runtime_with(RemitConfig::default()).await
}

pub async fn runtime_with(config: RemitConfig) -> TestRuntime {
    let notifier = Arc::new(RecordingNotifier::new());
    let runtime = BillingRuntime::builder()
        .config(config)
        .catalog(catalog())
        .notifier(notifier.clone())
        .with_logging(false)
        .build()
        .unwrap();

    let provider = Arc::new(MockPaymentProvider::new());
    runtime
        .install_plugin(mock::descriptor(), mock::shared_factory(provider.clone()))
        .await
        .unwrap();

    TestRuntime {
        runtime,
        provider,
        notifier,
    }
}
