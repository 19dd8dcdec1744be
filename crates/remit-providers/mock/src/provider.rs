use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use remit_core::{
    CaptureResult, CapabilityProvider, ChargeResult, ChargeStatus, Money, ParsedEvent,
    PaymentProvider, PluginCategory, ProviderError, ProviderResult, RefundResult,
};
use tracing::{debug, info};

use crate::config::MockProviderConfig;
use crate::webhook;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCustomer {
    pub customer_ref: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCharge {
    pub charge_id: String,
    pub customer_ref: String,
    pub amount: Money,
    /// Minor units refunded so far.
    pub refunded: i64,
    pub status: ChargeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRefund {
    pub refund_id: String,
    pub charge_id: String,
    pub amount: Money,
}

#[derive(Default)]
struct MockState {
    customers: Vec<MockCustomer>,
    charges: BTreeMap<String, MockCharge>,
    refunds: Vec<MockRefund>,
    calls: Vec<String>,
    next_customer: u32,
    next_charge: u32,
    next_refund: u32,
}

/// In-memory payment provider with deterministic ids.
///
/// Every call is recorded in [`calls`](Self::calls). Charges follow
/// `Created → Captured → PartiallyRefunded → Refunded`; refunds may be
/// partial but never exceed the captured amount.
pub struct MockPaymentProvider {
    webhook_secret: String,
    state: Mutex<MockState>,
    latency: Mutex<Option<Duration>>,
    should_fail: AtomicBool,
    transient_failures: AtomicU32,
    torn_down: AtomicBool,
}

impl Default for MockPaymentProvider {
    fn default() -> Self {
        Self::with_config(MockProviderConfig::default())
    }
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MockProviderConfig) -> Self {
        Self {
            webhook_secret: config.webhook_secret,
            state: Mutex::default(),
            latency: Mutex::new(config.latency),
            should_fail: AtomicBool::new(config.fail),
            transient_failures: AtomicU32::new(0),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent payment call fail with
    /// [`ProviderError::Declined`].
    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    /// Makes the next `count` payment calls fail with
    /// [`ProviderError::Unavailable`], then recover.
    pub fn fail_transiently(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Delays every subsequent call, including webhook verification.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }

    /// Signs `payload` the way a real delivery from this provider would be.
    pub fn sign(&self, payload: &[u8]) -> ProviderResult<String> {
        webhook::sign(&self.webhook_secret, payload)
    }

    pub fn customers(&self) -> Vec<MockCustomer> {
        self.state.lock().customers.clone()
    }

    pub fn charges(&self) -> Vec<MockCharge> {
        self.state.lock().charges.values().cloned().collect()
    }

    pub fn charge(&self, charge_id: &str) -> Option<MockCharge> {
        self.state.lock().charges.get(charge_id).cloned()
    }

    pub fn refunds(&self) -> Vec<MockRefund> {
        self.state.lock().refunds.clone()
    }

    /// Names of the provider methods called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: &str) -> ProviderResult<()> {
        self.state.lock().calls.push(call.to_string());
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("provider has been torn down".into()));
        }
        Ok(())
    }

    fn check_failure(&self) -> ProviderResult<()> {
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Unavailable("mock gateway busy".into()));
        }
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Declined("mock payment failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CapabilityProvider for MockPaymentProvider {
    fn category(&self) -> PluginCategory {
        PluginCategory::Payment
    }

    async fn teardown(&self) -> ProviderResult<()> {
        self.torn_down.store(true, Ordering::SeqCst);
        debug!("Mock payment provider torn down");
        Ok(())
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_customer(&self, email: &str) -> ProviderResult<String> {
        self.enter("create_customer").await?;
        self.check_failure()?;

        let mut state = self.state.lock();
        state.next_customer += 1;
        let customer_ref = format!("cus_mock_{:04}", state.next_customer);
        state.customers.push(MockCustomer {
            customer_ref: customer_ref.clone(),
            email: email.to_string(),
        });
        Ok(customer_ref)
    }

    async fn create_charge(
        &self,
        amount: &Money,
        customer_ref: &str,
    ) -> ProviderResult<ChargeResult> {
        self.enter("create_charge").await?;
        self.check_failure()?;
        if amount.is_zero() {
            return Err(ProviderError::InvalidAmount("charge amount must be positive".into()));
        }

        let mut state = self.state.lock();
        if !state.customers.iter().any(|c| c.customer_ref == customer_ref) {
            return Err(ProviderError::not_found("customer", customer_ref));
        }
        state.next_charge += 1;
        let charge = MockCharge {
            charge_id: format!("ch_mock_{:04}", state.next_charge),
            customer_ref: customer_ref.to_string(),
            amount: amount.clone(),
            refunded: 0,
            status: ChargeStatus::Created,
        };
        state
            .charges
            .insert(charge.charge_id.clone(), charge.clone());
        info!(charge_id = %charge.charge_id, amount = %charge.amount, "Mock charge created");

        Ok(ChargeResult {
            charge_id: charge.charge_id,
            customer_ref: charge.customer_ref,
            amount: charge.amount,
            status: charge.status,
        })
    }

    async fn capture_payment(&self, charge_id: &str) -> ProviderResult<CaptureResult> {
        self.enter("capture_payment").await?;
        self.check_failure()?;

        let mut state = self.state.lock();
        let charge = state
            .charges
            .get_mut(charge_id)
            .ok_or_else(|| ProviderError::not_found("charge", charge_id))?;
        let current = charge.status;
        match current {
            ChargeStatus::Created => charge.status = ChargeStatus::Captured,
            ChargeStatus::Captured => {}
            status => {
                return Err(ProviderError::InvalidState(format!(
                    "cannot capture charge {charge_id} in status {status:?}"
                )));
            }
        }
        Ok(CaptureResult {
            charge_id: charge.charge_id.clone(),
            amount: charge.amount.clone(),
            status: charge.status,
        })
    }

    async fn refund(&self, charge_id: &str, amount: Option<&Money>) -> ProviderResult<RefundResult> {
        self.enter("refund").await?;
        self.check_failure()?;

        let mut state = self.state.lock();
        let charge = state
            .charges
            .get_mut(charge_id)
            .ok_or_else(|| ProviderError::not_found("charge", charge_id))?;
        if !matches!(
            charge.status,
            ChargeStatus::Captured | ChargeStatus::PartiallyRefunded
        ) {
            return Err(ProviderError::InvalidState(format!(
                "cannot refund charge {charge_id} in status {:?}",
                charge.status
            )));
        }

        let remaining = charge.amount.minor() - charge.refunded;
        let requested = match amount {
            Some(a) if !a.same_currency(&charge.amount) => {
                return Err(ProviderError::InvalidAmount(format!(
                    "refund currency {} does not match charge currency {}",
                    a.currency(),
                    charge.amount.currency()
                )));
            }
            Some(a) => a.minor(),
            None => remaining,
        };
        if requested <= 0 || requested > remaining {
            return Err(ProviderError::InvalidAmount(format!(
                "refund of {requested} exceeds refundable {remaining}"
            )));
        }

        charge.refunded += requested;
        charge.status = if charge.refunded == charge.amount.minor() {
            ChargeStatus::Refunded
        } else {
            ChargeStatus::PartiallyRefunded
        };
        let refunded = Money::new(requested, charge.amount.currency())
            .map_err(|e| ProviderError::InvalidAmount(e.to_string()))?;
        let status = charge.status;

        state.next_refund += 1;
        let refund = MockRefund {
            refund_id: format!("re_mock_{:04}", state.next_refund),
            charge_id: charge_id.to_string(),
            amount: refunded,
        };
        state.refunds.push(refund.clone());
        info!(refund_id = %refund.refund_id, charge_id, amount = %refund.amount, "Mock refund created");

        Ok(RefundResult {
            refund_id: refund.refund_id,
            charge_id: refund.charge_id,
            amount: refund.amount,
            status,
        })
    }

    async fn charge_status(&self, charge_id: &str) -> ProviderResult<ChargeStatus> {
        self.enter("charge_status").await?;
        self.state
            .lock()
            .charges
            .get(charge_id)
            .map(|c| c.status)
            .ok_or_else(|| ProviderError::not_found("charge", charge_id))
    }

    async fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> ProviderResult<ParsedEvent> {
        self.enter("verify_webhook_signature").await?;
        webhook::verify(&self.webhook_secret, payload, signature)?;
        webhook::parse(payload)
    }
}

#[cfg(test)]
mod tests {
    use remit_core::WebhookEventKind;
    use uuid::Uuid;

    use super::*;
    use crate::webhook::WebhookPayload;

    fn usd(minor: i64) -> Money {
        Money::new(minor, "USD").unwrap()
    }

    async fn captured(provider: &MockPaymentProvider, minor: i64) -> String {
        let customer = provider.create_customer("a@example.com").await.unwrap();
        let charge = provider.create_charge(&usd(minor), &customer).await.unwrap();
        provider.capture_payment(&charge.charge_id).await.unwrap();
        charge.charge_id
    }

    #[tokio::test]
    async fn test_deterministic_ids() {
        let provider = MockPaymentProvider::new();
        let customer = provider.create_customer("a@example.com").await.unwrap();
        assert_eq!(customer, "cus_mock_0001");
        let charge = provider.create_charge(&usd(1999), &customer).await.unwrap();
        assert_eq!(charge.charge_id, "ch_mock_0001");
        assert_eq!(charge.status, ChargeStatus::Created);

        let capture = provider.capture_payment("ch_mock_0001").await.unwrap();
        assert_eq!(capture.status, ChargeStatus::Captured);
        let refund = provider.refund("ch_mock_0001", None).await.unwrap();
        assert_eq!(refund.refund_id, "re_mock_0001");
        assert_eq!(refund.amount, usd(1999));
        assert_eq!(refund.status, ChargeStatus::Refunded);

        assert_eq!(
            provider.calls(),
            vec!["create_customer", "create_charge", "capture_payment", "refund"]
        );
    }

    #[tokio::test]
    async fn test_partial_refunds_are_bounded() {
        let provider = MockPaymentProvider::new();
        let charge = captured(&provider, 1000).await;

        let first = provider.refund(&charge, Some(&usd(400))).await.unwrap();
        assert_eq!(first.status, ChargeStatus::PartiallyRefunded);
        assert!(matches!(
            provider.refund(&charge, Some(&usd(700))).await,
            Err(ProviderError::InvalidAmount(_))
        ));
        let rest = provider.refund(&charge, None).await.unwrap();
        assert_eq!(rest.amount, usd(600));
        assert_eq!(rest.status, ChargeStatus::Refunded);
        assert!(matches!(
            provider.refund(&charge, None).await,
            Err(ProviderError::InvalidState(_))
        ));
        assert_eq!(provider.refunds().len(), 2);
    }

    #[tokio::test]
    async fn test_refund_requires_capture_and_currency() {
        let provider = MockPaymentProvider::new();
        let customer = provider.create_customer("b@example.com").await.unwrap();
        let charge = provider.create_charge(&usd(500), &customer).await.unwrap();
        assert!(matches!(
            provider.refund(&charge.charge_id, None).await,
            Err(ProviderError::InvalidState(_))
        ));
        provider.capture_payment(&charge.charge_id).await.unwrap();
        let eur = Money::new(100, "EUR").unwrap();
        assert!(matches!(
            provider.refund(&charge.charge_id, Some(&eur)).await,
            Err(ProviderError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_switch() {
        let provider = MockPaymentProvider::new();
        provider.set_should_fail(true);
        assert!(matches!(
            provider.create_customer("c@example.com").await,
            Err(ProviderError::Declined(_))
        ));
        provider.set_should_fail(false);
        assert!(provider.create_customer("c@example.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_transient_failures_wear_off() {
        let provider = MockPaymentProvider::new();
        provider.fail_transiently(2);
        for _ in 0..2 {
            assert!(matches!(
                provider.create_customer("t@example.com").await,
                Err(ProviderError::Unavailable(_))
            ));
        }
        assert!(provider.create_customer("t@example.com").await.is_ok());
        assert_eq!(provider.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_customer_and_charge() {
        let provider = MockPaymentProvider::new();
        assert_eq!(
            provider.create_charge(&usd(100), "cus_nope").await,
            Err(ProviderError::not_found("customer", "cus_nope"))
        );
        assert!(matches!(
            provider.charge_status("ch_nope").await,
            Err(ProviderError::NotFound { kind: "charge", .. })
        ));
    }

    #[tokio::test]
    async fn test_webhook_verification() {
        let provider = MockPaymentProvider::new();
        let invoice = Uuid::new_v4();
        let body = WebhookPayload::new("evt_1", WebhookEventKind::PaymentSucceeded)
            .charge("ch_mock_0001")
            .invoice(invoice)
            .to_bytes()
            .unwrap();

        let sig = provider.sign(&body).unwrap();
        let event = provider.verify_webhook_signature(&body, &sig).await.unwrap();
        assert_eq!(event.invoice_id, Some(invoice));

        assert_eq!(
            provider.verify_webhook_signature(&body, "deadbeef").await,
            Err(ProviderError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn test_teardown_disables_calls() {
        let provider = MockPaymentProvider::new();
        provider.teardown().await.unwrap();
        assert!(provider.is_torn_down());
        assert!(matches!(
            provider.create_customer("d@example.com").await,
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_latency_is_applied() {
        let provider = MockPaymentProvider::new();
        provider.set_latency(Some(Duration::from_millis(50)));
        let result = tokio::time::timeout(
            Duration::from_millis(10),
            provider.create_customer("e@example.com"),
        )
        .await;
        assert!(result.is_err());
    }
}
