//! The billing runtime: one bus, one plugin registry, one ledger.
//!
//! ```rust,ignore
//! use remit_runtime::BillingRuntime;
//!
//! let runtime = BillingRuntime::builder()
//!     .config_file("remit.toml")
//!     .catalog(catalog)
//!     .build()?;
//!
//! runtime.install_plugin(mock::descriptor(), mock::factory()).await?;
//!
//! let checkout = runtime.checkout(user_id, items).await?;
//! let outcome = runtime
//!     .ingest_webhook("mock_payment", &payload, &signature)
//!     .await?;
//! ```

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use remit_billing::{
    BillingError, BillingServices, CheckoutHandler, CheckoutReceipt, InMemoryCatalog, InvoiceStatus,
    Ledger, Notifier, Repositories, SubscriptionExpiryHandler, TracingNotifier,
    register_billing_handlers,
};
use remit_core::{
    DomainEvent, EventBus, EventPayload, HandlerError, LineItemRequest, PaymentFailed,
    PaymentProvider, PaymentRefunded, ProviderError, PublishReport, WebhookEventKind,
};
use remit_plugin::{
    MemoryStateStore, PluginConfig, PluginDescriptor, PluginRegistry, PluginStateStore,
    ProviderFactory, RestoreSummary,
};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{ConfigLoader, RemitConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::gateway::{IdempotencyStore, MemoryIdempotencyStore, ProviderGateway, idempotency_key};
use crate::logging;
use crate::state_file::JsonFileStateStore;

/// Result of [`BillingRuntime::checkout`].
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub receipt: CheckoutReceipt,
    /// The full dispatch report, including other checkout subscribers.
    pub report: PublishReport,
}

/// Result of [`BillingRuntime::ingest_webhook`].
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    /// The webhook was translated into a domain event and published.
    Published {
        webhook_id: String,
        report: PublishReport,
    },
    /// Verified, but of a kind the billing core does not act on.
    Ignored {
        webhook_id: String,
        kind: WebhookEventKind,
    },
}

impl WebhookOutcome {
    pub fn webhook_id(&self) -> &str {
        match self {
            Self::Published { webhook_id, .. } | Self::Ignored { webhook_id, .. } => webhook_id,
        }
    }

    pub fn report(&self) -> Option<&PublishReport> {
        match self {
            Self::Published { report, .. } => Some(report),
            Self::Ignored { .. } => None,
        }
    }
}

// =============================================================================
// BillingRuntime
// =============================================================================

/// Wires the event bus, the plugin registry and the ledger together.
///
/// Request-facing operations only publish events; the billing handlers
/// registered at build time apply every ledger change.
pub struct BillingRuntime {
    config: RemitConfig,
    bus: Arc<EventBus>,
    registry: Arc<PluginRegistry>,
    ledger: Arc<Ledger>,
    notifier: Arc<dyn Notifier>,
    gateway: ProviderGateway,
}

impl BillingRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &RemitConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    // ─── Plugins ─────────────────────────────────────────────────────────────

    /// Registers a plugin without initializing it.
    pub async fn register_plugin(
        &self,
        descriptor: PluginDescriptor,
        factory: ProviderFactory,
    ) -> RuntimeResult<()> {
        self.registry.register(descriptor, factory).await?;
        Ok(())
    }

    /// Registers, initializes with the configured settings, and enables.
    pub async fn install_plugin(
        &self,
        descriptor: PluginDescriptor,
        factory: ProviderFactory,
    ) -> RuntimeResult<()> {
        let name = descriptor.name.clone();
        let config = self.config.plugins.config_for(&name);
        self.install_plugin_with(descriptor, factory, config).await?;
        info!(plugin = %name, "Plugin installed");
        Ok(())
    }

    /// [`install_plugin`](Self::install_plugin) with an explicit config.
    pub async fn install_plugin_with(
        &self,
        descriptor: PluginDescriptor,
        factory: ProviderFactory,
        config: PluginConfig,
    ) -> RuntimeResult<()> {
        let name = descriptor.name.clone();
        self.registry.register(descriptor, factory).await?;
        self.registry.initialize(&name, config).await?;
        self.registry.enable(&name).await?;
        Ok(())
    }

    /// Re-applies persisted plugin state to the registered plugins.
    pub async fn restore_plugins(&self) -> RuntimeResult<RestoreSummary> {
        let summary = self.registry.restore().await?;
        info!(
            restored = summary.restored.len(),
            failed = summary.failed.len(),
            unknown = summary.unknown.len(),
            "Plugin state restored"
        );
        Ok(summary)
    }

    /// The provider of an Enabled payment plugin.
    pub fn payment_provider(&self, name: &str) -> RuntimeResult<Arc<dyn PaymentProvider>> {
        self.registry
            .payment_provider(name)
            .ok_or_else(|| RuntimeError::ProviderUnavailable(name.to_string()))
    }

    // ─── Checkout & payments ─────────────────────────────────────────────────

    /// Publishes `checkout.requested` and returns the pending invoice.
    pub async fn checkout(
        &self,
        user_id: Uuid,
        items: Vec<LineItemRequest>,
    ) -> RuntimeResult<CheckoutOutcome> {
        if items.is_empty() {
            return Err(BillingError::EmptyCheckout.into());
        }

        let report = self
            .bus
            .publish(DomainEvent::checkout_requested(user_id, items))
            .await;
        let data = Self::handler_data(&report, CheckoutHandler::NAME)?;
        let receipt: CheckoutReceipt = serde_json::from_value(data.clone()).map_err(|e| {
            RuntimeError::handler_failed(
                CheckoutHandler::NAME,
                HandlerError::failed(format!("unreadable checkout receipt: {e}")),
            )
        })?;

        info!(
            user_id = %user_id,
            invoice_id = %receipt.invoice_id,
            amount = %receipt.amount,
            "Checkout opened"
        );
        Ok(CheckoutOutcome { receipt, report })
    }

    /// Publishes `payment.captured` for a charge made outside the runtime.
    pub async fn capture(
        &self,
        invoice_id: Uuid,
        provider: &str,
        charge_id: &str,
    ) -> PublishReport {
        self.bus
            .publish(DomainEvent::payment_captured(invoice_id, provider, charge_id))
            .await
    }

    /// Charges the invoice amount through an Enabled provider and publishes
    /// `payment.captured` once the capture succeeds.
    ///
    /// Each provider call is keyed on the invoice, so paying the same invoice
    /// again replays the earlier responses instead of charging twice.
    /// Transient provider failures are retried per `[payments]`.
    pub async fn pay_invoice(
        &self,
        invoice_id: Uuid,
        provider_name: &str,
        email: &str,
    ) -> RuntimeResult<PublishReport> {
        let invoice = self.ledger.invoice(invoice_id).await?;
        let provider = self.payment_provider(provider_name)?;

        let provider: &dyn PaymentProvider = provider.as_ref();
        let gateway = &self.gateway;
        let invoice_ref = invoice_id.to_string();
        let key = |operation: &str, extra: &[&str]| {
            let args: Vec<&str> = std::iter::once(invoice_ref.as_str())
                .chain(extra.iter().copied())
                .collect();
            idempotency_key(provider_name, operation, &args)
        };

        let span = info_span!("pay_invoice", invoice_id = %invoice_id, provider = %provider_name);
        let capture = async {
            let customer_ref: String = gateway
                .call(&key("create_customer", &[email]), "create_customer", move || {
                    provider.create_customer(email)
                })
                .await?;
            let customer_ref = customer_ref.as_str();
            let amount = &invoice.amount;
            let charge = gateway
                .call(&key("create_charge", &[]), "create_charge", move || {
                    provider.create_charge(amount, customer_ref)
                })
                .await?;
            let charge_id = charge.charge_id.as_str();
            gateway
                .call(&key("capture_payment", &[]), "capture_payment", move || {
                    provider.capture_payment(charge_id)
                })
                .await
        }
        .instrument(span)
        .await;

        match capture {
            Ok(captured) => Ok(self
                .capture(invoice_id, provider_name, &captured.charge_id)
                .await),
            Err(e @ ProviderError::Declined(_)) => {
                warn!(invoice_id = %invoice_id, provider = %provider_name, error = %e, "Charge declined");
                self.fail_payment(invoice_id, Some(provider_name), Some(e.to_string()))
                    .await;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Publishes `payment.refunded` without contacting the provider.
    pub async fn refund(&self, invoice_id: Uuid) -> PublishReport {
        self.bus
            .publish(DomainEvent::payment_refunded(invoice_id))
            .await
    }

    /// Refunds the invoice's charge at its provider, then publishes
    /// `payment.refunded` carrying the provider's refund id.
    ///
    /// The provider refund is keyed on the invoice and charge, so a repeated
    /// call does not refund twice.
    pub async fn refund_through_provider(&self, invoice_id: Uuid) -> RuntimeResult<PublishReport> {
        let invoice = self.ledger.invoice(invoice_id).await?;
        let (InvoiceStatus::Paid, Some(provider_name), Some(charge_id)) =
            (invoice.status, &invoice.provider, &invoice.charge_id)
        else {
            return Err(BillingError::InvalidInvoiceState {
                invoice_id,
                status: invoice.status,
                action: "refund through its provider",
            }
            .into());
        };
        let provider = self.payment_provider(provider_name)?;
        let provider: &dyn PaymentProvider = provider.as_ref();
        let key = idempotency_key(
            provider_name,
            "refund",
            &[invoice_id.to_string().as_str(), charge_id.as_str()],
        );
        let refund = self
            .gateway
            .call(&key, "refund", move || provider.refund(charge_id, None))
            .await?;
        debug!(invoice_id = %invoice_id, refund_id = %refund.refund_id, "Provider refund created");

        let event = DomainEvent::new(EventPayload::PaymentRefunded(PaymentRefunded {
            invoice_id,
            provider: Some(provider_name.clone()),
            refund_id: Some(refund.refund_id),
        }));
        Ok(self.bus.publish(event).await)
    }

    /// Publishes `payment.failed`.
    pub async fn fail_payment(
        &self,
        invoice_id: Uuid,
        provider: Option<&str>,
        reason: Option<String>,
    ) -> PublishReport {
        let event = DomainEvent::new(EventPayload::PaymentFailed(PaymentFailed {
            invoice_id,
            provider: provider.map(str::to_string),
            reason,
        }));
        self.bus.publish(event).await
    }

    // ─── Webhooks ────────────────────────────────────────────────────────────

    /// Verifies a provider webhook and publishes the matching domain event.
    ///
    /// Verification runs under `webhooks.verify_timeout_ms`; a timeout is
    /// returned as [`ProviderError::Timeout`].
    pub async fn ingest_webhook(
        &self,
        provider_name: &str,
        payload: &[u8],
        signature: &str,
    ) -> RuntimeResult<WebhookOutcome> {
        let provider = self.payment_provider(provider_name)?;
        let deadline = self.config.webhooks.verify_timeout();

        let parsed = tokio::time::timeout(
            deadline,
            provider.verify_webhook_signature(payload, signature),
        )
        .await
        .map_err(|_| ProviderError::Timeout(deadline))?
        .inspect_err(|e| {
            warn!(provider = %provider_name, error = %e, "Webhook rejected");
        })?;

        let webhook_id = parsed.event_id.clone();
        let missing = |field: &str| {
            ProviderError::MalformedPayload(format!(
                "{} webhook {webhook_id} has no {field}",
                parsed.kind
            ))
        };

        let event = match parsed.kind {
            WebhookEventKind::PaymentSucceeded => {
                let invoice_id = parsed.invoice_id.ok_or_else(|| missing("invoice_id"))?;
                let charge_id = parsed
                    .charge_id
                    .as_deref()
                    .ok_or_else(|| missing("charge_id"))?;
                DomainEvent::payment_captured(invoice_id, provider_name, charge_id)
            }
            WebhookEventKind::RefundCreated => {
                let invoice_id = parsed.invoice_id.ok_or_else(|| missing("invoice_id"))?;
                DomainEvent::new(EventPayload::PaymentRefunded(PaymentRefunded {
                    invoice_id,
                    provider: Some(provider_name.to_string()),
                    refund_id: None,
                }))
            }
            WebhookEventKind::PaymentFailed => {
                let invoice_id = parsed.invoice_id.ok_or_else(|| missing("invoice_id"))?;
                let reason = parsed
                    .raw
                    .pointer("/data/reason")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                DomainEvent::new(EventPayload::PaymentFailed(PaymentFailed {
                    invoice_id,
                    provider: Some(provider_name.to_string()),
                    reason,
                }))
            }
            kind => {
                debug!(provider = %provider_name, webhook_id = %webhook_id, kind = %kind, "Webhook ignored");
                return Ok(WebhookOutcome::Ignored { webhook_id, kind });
            }
        };

        info!(
            provider = %provider_name,
            webhook_id = %webhook_id,
            event = %event.kind(),
            "Webhook accepted"
        );
        let report = self.bus.publish(event).await;
        Ok(WebhookOutcome::Published { webhook_id, report })
    }

    // ─── Maintenance ─────────────────────────────────────────────────────────

    /// Publishes `subscription.expiry_due` for `now`.
    ///
    /// The expiry handler applies the transitions; each expired subscription
    /// shows up as a `subscription.expired` follow-up in the report.
    pub async fn expire_subscriptions(&self, now: DateTime<Utc>) -> RuntimeResult<PublishReport> {
        let report = self
            .bus
            .publish(DomainEvent::subscription_expiry_due(now))
            .await;
        Self::handler_data(&report, SubscriptionExpiryHandler::NAME)?;
        let expired = report.follow_ups.len();
        if expired > 0 {
            info!(expired, "Subscriptions expired");
        }
        Ok(report)
    }

    /// Releases every provider, dependents first.
    ///
    /// Persisted plugin state is kept, so the next process restores it.
    pub async fn shutdown(&self) -> Vec<String> {
        let released = self.registry.release_all().await;
        info!(plugins = ?released, "Runtime shut down");
        released
    }

    /// Data returned by `handler`, or why it is missing.
    fn handler_data<'a>(
        report: &'a PublishReport,
        handler: &str,
    ) -> RuntimeResult<&'a serde_json::Value> {
        if report.no_handlers() {
            return Err(RuntimeError::NoHandler(report.kind));
        }
        let outcome = report
            .outcome(handler)
            .ok_or_else(|| RuntimeError::NoHandler(report.kind))?;
        outcome
            .result
            .as_ref()
            .map_err(|e| RuntimeError::handler_failed(handler, e.clone()))
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for [`BillingRuntime`].
///
/// Without an explicit [`config`](Self::config), configuration is loaded
/// through [`ConfigLoader`] from the current directory and `REMIT_*`
/// environment variables.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<RemitConfig>,
    state_store: Option<Arc<dyn PluginStateStore>>,
    repositories: Option<Repositories>,
    notifier: Option<Arc<dyn Notifier>>,
    idempotency_store: Option<Arc<dyn IdempotencyStore>>,
    init_logging: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            config: None,
            state_store: None,
            repositories: None,
            notifier: None,
            idempotency_store: None,
            init_logging: true,
        }
    }

    /// Uses `config` as-is instead of loading one.
    pub fn config(mut self, config: RemitConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Overrides the store chosen from `plugins.state_file`.
    pub fn state_store(mut self, store: Arc<dyn PluginStateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn repositories(mut self, repositories: Repositories) -> Self {
        self.repositories = Some(repositories);
        self
    }

    /// Fresh in-memory repositories over `catalog`.
    pub fn catalog(self, catalog: InMemoryCatalog) -> Self {
        self.repositories(Repositories::in_memory(catalog))
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Cache of provider responses. In-memory when unset.
    pub fn idempotency_store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency_store = Some(store);
        self
    }

    /// Whether `build` installs the global log subscriber (default: true).
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.init_logging = enabled;
        self
    }

    pub fn build(self) -> RuntimeResult<BillingRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => self.config_loader.load()?,
        };
        validate_config(&config)?;

        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let bus = Arc::new(EventBus::new(config.bus.to_bus_config()));

        let store: Arc<dyn PluginStateStore> = match (self.state_store, &config.plugins.state_file)
        {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(JsonFileStateStore::new(path)),
            (None, None) => Arc::new(MemoryStateStore::new()),
        };
        let registry = Arc::new(PluginRegistry::with_config(
            Arc::clone(&bus),
            store,
            config.plugins.to_registry_config(),
        ));

        let repositories = self
            .repositories
            .unwrap_or_else(|| Repositories::in_memory(InMemoryCatalog::new()));
        let ledger = Arc::new(Ledger::new(repositories));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier));

        let gateway = ProviderGateway::new(
            config.payments.to_retry_policy(),
            self.idempotency_store
                .unwrap_or_else(|| Arc::new(MemoryIdempotencyStore::new())),
            config.payments.idempotency_ttl(),
        );

        register_billing_handlers(
            &bus,
            BillingServices::new(Arc::clone(&ledger), Arc::clone(&notifier)),
        );

        info!(
            log_level = %config.logging.level,
            handler_timeout_ms = config.bus.handler_timeout_ms,
            state_file = ?config.plugins.state_file,
            max_retries = config.payments.max_retries,
            "Billing runtime ready"
        );

        Ok(BillingRuntime {
            config,
            bus,
            registry,
            ledger,
            notifier,
            gateway,
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
