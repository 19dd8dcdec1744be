//! Registration glue: the descriptor and factory handed to the registry.

use std::sync::Arc;

use remit_core::{Capability, PluginCategory};
use remit_plugin::{BoxError, PluginDescriptor, ProviderFactory, provider_factory};
use semver::Version;

use crate::config::{DEFAULT_WEBHOOK_SECRET, MockProviderConfig};
use crate::provider::MockPaymentProvider;

pub const MOCK_PROVIDER_NAME: &str = "mock_payment";

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(MOCK_PROVIDER_NAME, Version::new(1, 0, 0), PluginCategory::Payment)
        .description("In-memory payment provider for tests and demos")
        .config_default("webhook_secret", DEFAULT_WEBHOOK_SECRET)
        .config_default("latency_ms", 0i64)
        .config_default("fail", false)
}

/// Builds a fresh [`MockPaymentProvider`] per initialization.
pub fn factory() -> ProviderFactory {
    provider_factory(|config, _cancel| async move {
        let provider = MockPaymentProvider::with_config(MockProviderConfig::from_plugin_config(
            &config,
        ));
        Ok::<_, BoxError>(Capability::Payment(Arc::new(provider)))
    })
}

/// A factory that always hands out `provider`.
///
/// Lets callers keep a typed handle for inspection while the registry owns
/// the capability.
pub fn shared_factory(provider: Arc<MockPaymentProvider>) -> ProviderFactory {
    provider_factory(move |_config, _cancel| {
        let provider = provider.clone();
        async move { Ok::<_, BoxError>(Capability::Payment(provider)) }
    })
}

#[cfg(test)]
mod tests {
    use remit_core::EventBus;
    use remit_plugin::{MemoryStateStore, PluginConfig, PluginRegistry, PluginStatus};

    use super::*;

    #[tokio::test]
    async fn test_registers_as_payment_plugin() {
        let registry = PluginRegistry::new(
            Arc::new(EventBus::default()),
            Arc::new(MemoryStateStore::new()),
        );
        registry.register(descriptor(), factory()).await.unwrap();
        registry
            .initialize(
                MOCK_PROVIDER_NAME,
                PluginConfig::new().with("webhook_secret", "whsec_demo"),
            )
            .await
            .unwrap();
        registry.enable(MOCK_PROVIDER_NAME).await.unwrap();

        assert_eq!(
            registry.status(MOCK_PROVIDER_NAME),
            Some(PluginStatus::Enabled)
        );
        let config = registry.config(MOCK_PROVIDER_NAME).unwrap();
        assert_eq!(config.get_str("webhook_secret"), Some("whsec_demo"));
        assert_eq!(config.get_int("latency_ms"), Some(0));
        assert!(registry.payment_provider(MOCK_PROVIDER_NAME).is_some());
    }

    #[tokio::test]
    async fn test_shared_factory_exposes_same_instance() {
        let provider = Arc::new(MockPaymentProvider::new());
        let registry = PluginRegistry::new(
            Arc::new(EventBus::default()),
            Arc::new(MemoryStateStore::new()),
        );
        registry
            .register(descriptor(), shared_factory(provider.clone()))
            .await
            .unwrap();
        registry
            .initialize(MOCK_PROVIDER_NAME, PluginConfig::new())
            .await
            .unwrap();
        registry.enable(MOCK_PROVIDER_NAME).await.unwrap();

        let handle = registry.payment_provider(MOCK_PROVIDER_NAME).unwrap();
        handle.create_customer("x@example.com").await.unwrap();
        assert_eq!(provider.customers().len(), 1);

        registry.disable(MOCK_PROVIDER_NAME, false).await.unwrap();
        assert!(provider.is_torn_down());
    }
}
