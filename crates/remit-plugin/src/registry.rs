//! The plugin registry.
//!
//! [`PluginRegistry`] owns every known plugin, its lifecycle status, its
//! validated configuration and (while Initialized or Enabled) its provider
//! instance. All status changes go through the methods below; each successful
//! transition is written through to the [`PluginStateStore`] and announced on
//! the [`EventBus`] as a `plugin.*` event.
//!
//! # Concurrency
//!
//! Transitions of one plugin are linearized by a per-name async lock held for
//! the whole operation, including provider construction and teardown.
//! Independent plugins transition concurrently. Checks that span plugins
//! (dependencies Enabled, no Enabled dependents) are made and applied under a
//! single write of the entry table, so the invariant "an Enabled plugin never
//! has a missing or non-Enabled dependency" holds at every instant.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = PluginRegistry::new(bus.clone(), Arc::new(MemoryStateStore::new()));
//! registry.register(mock::descriptor(), mock::factory()).await?;
//! registry.resolve_dependencies()?;
//! registry.initialize("mock_payment", PluginConfig::new()).await?;
//! registry.enable("mock_payment").await?;
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use remit_core::{
    Capability, DomainEvent, EventBus, EventPayload, PaymentProvider, PluginLifecycle,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::descriptor::{PluginConfig, PluginDescriptor, PluginStatus};
use crate::error::{BoxError, PluginError, PluginResult};
use crate::resolver;
use crate::store::{PersistedPlugin, PluginStateStore};

// =============================================================================
// Provider factories
// =============================================================================

/// Builds a provider from validated configuration.
///
/// The token is cancelled if initialization is abandoned (deadline or caller
/// cancellation); long-running factories should observe it.
pub type ProviderFactory = Arc<
    dyn Fn(PluginConfig, CancellationToken) -> BoxFuture<'static, Result<Capability, BoxError>>
        + Send
        + Sync,
>;

/// Wraps an async closure as a [`ProviderFactory`].
pub fn provider_factory<F, Fut>(f: F) -> ProviderFactory
where
    F: Fn(PluginConfig, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Capability, BoxError>> + Send + 'static,
{
    Arc::new(move |config, cancel| Box::pin(f(config, cancel)))
}

/// Registry tuning knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Deadline for a provider factory.
    pub init_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// PluginEntry (internal)
// =============================================================================

struct PluginEntry {
    descriptor: Arc<PluginDescriptor>,
    factory: ProviderFactory,
    status: PluginStatus,
    config: PluginConfig,
    capability: Option<Capability>,
}

impl PluginEntry {
    fn persisted(&self) -> PersistedPlugin {
        PersistedPlugin {
            status: self.status,
            config: self.config.clone(),
        }
    }
}

/// Outcome of [`PluginRegistry::restore`].
#[derive(Debug, Default)]
pub struct RestoreSummary {
    /// Plugins brought back, with the status they reached.
    pub restored: Vec<(String, PluginStatus)>,
    /// Plugins whose persisted state could not be re-applied.
    pub failed: Vec<(String, String)>,
    /// Persisted records with no registered plugin.
    pub unknown: Vec<String>,
}

// =============================================================================
// PluginRegistry
// =============================================================================

/// Central owner of plugin descriptors, statuses and provider instances.
pub struct PluginRegistry {
    bus: Arc<EventBus>,
    store: Arc<dyn PluginStateStore>,
    config: RegistryConfig,
    entries: RwLock<BTreeMap<String, PluginEntry>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PluginRegistry {
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn PluginStateStore>) -> Self {
        Self::with_config(bus, store, RegistryConfig::default())
    }

    pub fn with_config(
        bus: Arc<EventBus>,
        store: Arc<dyn PluginStateStore>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            bus,
            store,
            config,
            entries: RwLock::new(BTreeMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_name(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.lock().entry(name.to_string()).or_default());
        lock.lock_owned().await
    }

    /// Locks several names in sorted order.
    async fn lock_names(&self, names: &BTreeSet<String>) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            guards.push(self.lock_name(name).await);
        }
        guards
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Adds a plugin. It passes through Discovered and lands in Registered.
    ///
    /// Does not touch persisted state, so a restart can register plugins and
    /// then [`restore`](Self::restore) what was saved.
    pub async fn register(
        &self,
        descriptor: PluginDescriptor,
        factory: ProviderFactory,
    ) -> PluginResult<()> {
        let name = descriptor.name.clone();
        let guard = self.lock_name(&name).await;
        let descriptor = Arc::new(descriptor);
        {
            let mut entries = self.entries.write();
            if entries.contains_key(&name) {
                return Err(PluginError::DuplicateName(name));
            }
            let mut entry = PluginEntry {
                descriptor: Arc::clone(&descriptor),
                factory,
                status: PluginStatus::Discovered,
                config: PluginConfig::new(),
                capability: None,
            };
            debug!(plugin = %name, version = %descriptor.version, "Plugin discovered");
            entry.status = PluginStatus::Registered;
            entries.insert(name.clone(), entry);
        }
        drop(guard);

        info!(plugin = %name, version = %descriptor.version, "Plugin registered");
        self.announce(&descriptor, PluginStatus::Registered).await;
        Ok(())
    }

    /// Orders all registered plugins by dependency.
    pub fn resolve_dependencies(&self) -> PluginResult<Vec<String>> {
        let descriptors = self.descriptors();
        resolver::resolve(descriptors.iter().map(|d| d.as_ref()))
    }

    // ─── Initialization ──────────────────────────────────────────────────────

    /// Instantiates the provider with validated `config`.
    ///
    /// On any failure, including a failed state write, the plugin keeps its
    /// previous status and no provider is retained.
    pub async fn initialize(&self, name: &str, config: PluginConfig) -> PluginResult<()> {
        self.initialize_with(name, config, &CancellationToken::new())
            .await
    }

    /// [`initialize`](Self::initialize) under a caller-supplied cancellation token.
    pub async fn initialize_with(
        &self,
        name: &str,
        config: PluginConfig,
        cancel: &CancellationToken,
    ) -> PluginResult<()> {
        let guard = self.lock_name(name).await;

        let (descriptor, factory) = {
            let entries = self.entries.read();
            let entry = entries
                .get(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            if !matches!(
                entry.status,
                PluginStatus::Registered | PluginStatus::Disabled
            ) {
                return Err(PluginError::invalid_transition(
                    name,
                    entry.status,
                    "initialize",
                ));
            }
            (Arc::clone(&entry.descriptor), Arc::clone(&entry.factory))
        };

        let config = config
            .validate(&descriptor.config_schema)
            .map_err(|message| PluginError::configuration(name, message))?;

        let capability = self
            .construct(name, &factory, config.clone(), cancel)
            .await?;

        if capability.category() != descriptor.category {
            Self::release(name, &capability).await;
            return Err(PluginError::Initialization {
                name: name.to_string(),
                source: format!(
                    "factory produced a {} provider for a {} plugin",
                    capability.category(),
                    descriptor.category
                )
                .into(),
            });
        }

        let (previous_status, previous_config, record) = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            let previous_status = std::mem::replace(&mut entry.status, PluginStatus::Initialized);
            let previous_config = std::mem::replace(&mut entry.config, config);
            entry.capability = Some(capability);
            (previous_status, previous_config, entry.persisted())
        };
        if let Err(e) = self.persist(name, &record).await {
            let capability = self.entries.write().get_mut(name).and_then(|entry| {
                entry.status = previous_status;
                entry.config = previous_config;
                entry.capability.take()
            });
            if let Some(capability) = capability {
                Self::release(name, &capability).await;
            }
            return Err(e);
        }
        drop(guard);

        info!(plugin = %name, "Plugin initialized");
        self.announce(&descriptor, PluginStatus::Initialized).await;
        Ok(())
    }

    async fn construct(
        &self,
        name: &str,
        factory: &ProviderFactory,
        config: PluginConfig,
        cancel: &CancellationToken,
    ) -> PluginResult<Capability> {
        let child = cancel.child_token();
        let timeout = self.config.init_timeout;
        let build = factory(config, child.clone());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PluginError::InitializationCancelled(name.to_string())),
            res = tokio::time::timeout(timeout, build) => match res {
                Err(_) => Err(PluginError::InitializationTimeout {
                    name: name.to_string(),
                    timeout,
                }),
                Ok(Err(source)) => Err(PluginError::Initialization {
                    name: name.to_string(),
                    source,
                }),
                Ok(Ok(capability)) => Ok(capability),
            },
        };

        if let Err(e) = &result {
            child.cancel();
            warn!(plugin = %name, error = %e, "Plugin initialization failed");
        }
        result
    }

    // ─── Enable / disable ────────────────────────────────────────────────────

    /// Moves an Initialized plugin to Enabled.
    ///
    /// Every declared dependency must be registered, satisfy its version
    /// constraint, and already be Enabled.
    pub async fn enable(&self, name: &str) -> PluginResult<()> {
        let guard = self.lock_name(name).await;

        let (descriptor, record) = {
            let mut entries = self.entries.write();
            let entry = entries
                .get(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            if entry.status != PluginStatus::Initialized {
                return Err(PluginError::invalid_transition(
                    name,
                    entry.status,
                    "enable",
                ));
            }
            let descriptor = Arc::clone(&entry.descriptor);

            for dep in &descriptor.dependencies {
                let Some(target) = entries.get(&dep.name) else {
                    return Err(PluginError::MissingDependency {
                        plugin: name.to_string(),
                        dependency: dep.name.clone(),
                    });
                };
                if !dep.constraint.matches(&target.descriptor.version) {
                    return Err(PluginError::VersionConstraint {
                        plugin: name.to_string(),
                        dependency: dep.name.clone(),
                        constraint: dep.constraint.to_string(),
                        found: target.descriptor.version.to_string(),
                    });
                }
                if target.status != PluginStatus::Enabled {
                    return Err(PluginError::DependencyNotEnabled {
                        name: name.to_string(),
                        dependency: dep.name.clone(),
                    });
                }
            }

            let entry = entries
                .get_mut(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            entry.status = PluginStatus::Enabled;
            (descriptor, entry.persisted())
        };
        if let Err(e) = self.persist(name, &record).await {
            if let Some(entry) = self.entries.write().get_mut(name) {
                entry.status = PluginStatus::Initialized;
            }
            return Err(e);
        }
        drop(guard);

        info!(plugin = %name, "Plugin enabled");
        self.announce(&descriptor, PluginStatus::Enabled).await;
        Ok(())
    }

    /// Moves a plugin to Disabled and releases its provider.
    ///
    /// If Enabled plugins depend on it (directly or transitively) the call is
    /// rejected with [`PluginError::DependentPluginActive`], unless `force` is
    /// set, in which case those dependents are disabled first, deepest first.
    ///
    /// Returns the names disabled, in the order they were disabled. A failed
    /// teardown or state write is returned after every plugin has been
    /// released; the in-memory status stays Disabled.
    pub async fn disable(&self, name: &str, force: bool) -> PluginResult<Vec<String>> {
        let planned = {
            let entries = self.entries.read();
            let entry = entries
                .get(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            Self::check_disable(name, entry.status)?;
            let dependents = Self::enabled_dependents(&entries, name);
            if !dependents.is_empty() && !force {
                return Err(PluginError::DependentPluginActive {
                    name: name.to_string(),
                    dependents: dependents.into_iter().collect(),
                });
            }
            let mut set = dependents;
            set.insert(name.to_string());
            set
        };

        let guards = self.lock_names(&planned).await;

        // Re-check under the table lock; state may have moved while waiting.
        let released: Vec<(Arc<PluginDescriptor>, PersistedPlugin, Option<Capability>)> = {
            let mut entries = self.entries.write();
            let entry = entries
                .get(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            Self::check_disable(name, entry.status)?;
            let dependents = Self::enabled_dependents(&entries, name);
            if !dependents.is_empty() && !force {
                return Err(PluginError::DependentPluginActive {
                    name: name.to_string(),
                    dependents: dependents.into_iter().collect(),
                });
            }

            let order = Self::disable_order(&entries, name, &dependents);
            order
                .into_iter()
                .filter_map(|n| {
                    let entry = entries.get_mut(&n)?;
                    entry.status = PluginStatus::Disabled;
                    let capability = entry.capability.take();
                    Some((Arc::clone(&entry.descriptor), entry.persisted(), capability))
                })
                .collect()
        };

        let mut disabled = Vec::with_capacity(released.len());
        let mut first_error = None;
        for (descriptor, record, capability) in &released {
            let plugin = descriptor.name.as_str();
            if let Some(capability) = capability
                && let Err(source) = capability.teardown().await
            {
                error!(plugin = %plugin, error = %source, "Provider teardown failed");
                first_error.get_or_insert(PluginError::Teardown {
                    name: plugin.to_string(),
                    source,
                });
            }
            if let Err(e) = self.persist(plugin, record).await {
                first_error.get_or_insert(e);
            }
            if plugin == name {
                info!(plugin = %plugin, "Plugin disabled");
            } else {
                info!(plugin = %plugin, cause = %name, "Plugin disabled by cascade");
            }
            disabled.push(plugin.to_string());
        }
        drop(guards);

        for (descriptor, _, _) in &released {
            self.announce(descriptor, PluginStatus::Disabled).await;
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(disabled),
        }
    }

    fn check_disable(name: &str, status: PluginStatus) -> PluginResult<()> {
        match status {
            PluginStatus::Enabled | PluginStatus::Initialized | PluginStatus::Registered => Ok(()),
            other => Err(PluginError::invalid_transition(name, other, "disable")),
        }
    }

    /// Enabled plugins that depend on `name`, directly or transitively.
    fn enabled_dependents(entries: &BTreeMap<String, PluginEntry>, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for (other, entry) in entries {
                if entry.status == PluginStatus::Enabled
                    && entry.descriptor.depends_on_name(&current)
                    && found.insert(other.clone())
                {
                    frontier.push(other.clone());
                }
            }
        }
        found.remove(name);
        found
    }

    /// Dependents in reverse dependency order, then `name` itself.
    fn disable_order(
        entries: &BTreeMap<String, PluginEntry>,
        name: &str,
        dependents: &BTreeSet<String>,
    ) -> Vec<String> {
        let order = resolver::resolve(entries.values().map(|e| e.descriptor.as_ref()))
            .unwrap_or_else(|_| entries.keys().cloned().collect());
        let mut out: Vec<String> = order
            .into_iter()
            .rev()
            .filter(|n| dependents.contains(n))
            .collect();
        out.push(name.to_string());
        out
    }

    // ─── Uninstall ───────────────────────────────────────────────────────────

    /// Removes a Disabled plugin and its persisted record.
    pub async fn uninstall(&self, name: &str) -> PluginResult<()> {
        let guard = self.lock_name(name).await;

        let entry = {
            let mut entries = self.entries.write();
            let entry = entries
                .get(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            if entry.status != PluginStatus::Disabled {
                return Err(PluginError::invalid_transition(
                    name,
                    entry.status,
                    "uninstall",
                ));
            }
            entries
                .remove(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?
        };

        let teardown = match &entry.capability {
            Some(capability) => capability.teardown().await,
            None => Ok(()),
        };
        let removed = self.store.remove(name).await.map_err(|source| {
            error!(plugin = %name, error = %source, "Failed to remove persisted plugin state");
            PluginError::Persistence {
                name: name.to_string(),
                source,
            }
        });
        drop(guard);

        info!(plugin = %name, "Plugin uninstalled");
        self.bus
            .publish(DomainEvent::new(EventPayload::PluginUninstalled(
                Self::lifecycle(&entry.descriptor),
            )))
            .await;

        teardown.map_err(|source| PluginError::Teardown {
            name: name.to_string(),
            source,
        })?;
        removed
    }

    // ─── Bulk operations ─────────────────────────────────────────────────────

    /// Re-applies persisted state to registered plugins, in dependency order.
    ///
    /// Enabled records are initialized with their saved config and enabled;
    /// Initialized records are initialized; Disabled records are disabled.
    /// Failures are collected, not returned, so one broken plugin does not keep
    /// the rest offline.
    pub async fn restore(&self) -> PluginResult<RestoreSummary> {
        let mut records = self.store.load_all().await?;
        let order = self.resolve_dependencies()?;
        let mut summary = RestoreSummary::default();

        for name in order {
            let Some(record) = records.remove(&name) else {
                continue;
            };
            let result = match record.status {
                PluginStatus::Enabled => match self.initialize(&name, record.config).await {
                    Ok(()) => self.enable(&name).await,
                    Err(e) => Err(e),
                },
                PluginStatus::Initialized => self.initialize(&name, record.config).await,
                PluginStatus::Disabled => self.disable(&name, false).await.map(|_| ()),
                PluginStatus::Registered | PluginStatus::Discovered => Ok(()),
            };
            match result {
                Ok(()) => {
                    let status = self.status(&name).unwrap_or(PluginStatus::Registered);
                    summary.restored.push((name, status));
                }
                Err(e) => {
                    warn!(plugin = %name, error = %e, "Could not restore plugin state");
                    summary.failed.push((name, e.to_string()));
                }
            }
        }

        summary.unknown = records.into_keys().collect();
        if !summary.unknown.is_empty() {
            warn!(plugins = ?summary.unknown, "Persisted state for unregistered plugins ignored");
        }
        Ok(summary)
    }

    /// Disables every plugin holding a provider, dependents first.
    pub async fn disable_all(&self) -> Vec<String> {
        let order = self
            .resolve_dependencies()
            .unwrap_or_else(|_| self.plugin_names());
        let mut disabled = Vec::new();
        for name in order.into_iter().rev() {
            if !self.status(&name).is_some_and(PluginStatus::holds_provider) {
                continue;
            }
            match self.disable(&name, true).await {
                Ok(names) => disabled.extend(names),
                Err(e) => warn!(plugin = %name, error = %e, "Failed to disable plugin"),
            }
        }
        disabled
    }

    /// Tears down every provider, dependents first, leaving persisted state
    /// untouched so the next [`restore`](Self::restore) brings the same
    /// plugins back.
    ///
    /// Released plugins read as Disabled in memory.
    pub async fn release_all(&self) -> Vec<String> {
        let order = self
            .resolve_dependencies()
            .unwrap_or_else(|_| self.plugin_names());
        let mut released = Vec::new();
        for name in order.into_iter().rev() {
            let guard = self.lock_name(&name).await;
            let capability = {
                let mut entries = self.entries.write();
                let Some(entry) = entries.get_mut(&name) else {
                    continue;
                };
                if !entry.status.holds_provider() {
                    continue;
                }
                entry.status = PluginStatus::Disabled;
                entry.capability.take()
            };
            if let Some(capability) = capability {
                Self::release(&name, &capability).await;
            }
            drop(guard);
            debug!(plugin = %name, "Provider released");
            released.push(name);
        }
        released
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.entries.read().get(name).map(|e| e.status)
    }

    pub fn descriptor(&self, name: &str) -> Option<Arc<PluginDescriptor>> {
        self.entries
            .read()
            .get(name)
            .map(|e| Arc::clone(&e.descriptor))
    }

    pub fn config(&self, name: &str) -> Option<PluginConfig> {
        self.entries.read().get(name).map(|e| e.config.clone())
    }

    /// All registered names, sorted.
    pub fn plugin_names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn enabled_plugins(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.status == PluginStatus::Enabled)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// The provider of an Enabled plugin.
    pub fn capability(&self, name: &str) -> Option<Capability> {
        self.entries
            .read()
            .get(name)
            .filter(|e| e.status == PluginStatus::Enabled)
            .and_then(|e| e.capability.clone())
    }

    /// The payment provider of an Enabled payment plugin.
    pub fn payment_provider(&self, name: &str) -> Option<Arc<dyn PaymentProvider>> {
        self.capability(name).and_then(|c| c.as_payment())
    }

    /// Every Enabled payment provider, by plugin name.
    pub fn payment_providers(&self) -> Vec<(String, Arc<dyn PaymentProvider>)> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.status == PluginStatus::Enabled)
            .filter_map(|(n, e)| {
                e.capability
                    .as_ref()
                    .and_then(Capability::as_payment)
                    .map(|p| (n.clone(), p))
            })
            .collect()
    }

    fn descriptors(&self) -> Vec<Arc<PluginDescriptor>> {
        self.entries
            .read()
            .values()
            .map(|e| Arc::clone(&e.descriptor))
            .collect()
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    async fn persist(&self, name: &str, record: &PersistedPlugin) -> PluginResult<()> {
        self.store.save(name, record).await.map_err(|source| {
            error!(plugin = %name, error = %source, "Failed to persist plugin state");
            PluginError::Persistence {
                name: name.to_string(),
                source,
            }
        })
    }

    /// Tears a provider down, logging a failure.
    async fn release(name: &str, capability: &Capability) {
        if let Err(e) = capability.teardown().await {
            error!(plugin = %name, error = %e, "Provider teardown failed");
        }
    }

    fn lifecycle(descriptor: &PluginDescriptor) -> PluginLifecycle {
        PluginLifecycle {
            name: descriptor.name.clone(),
            version: descriptor.version.to_string(),
        }
    }

    async fn announce(&self, descriptor: &PluginDescriptor, status: PluginStatus) {
        let lifecycle = Self::lifecycle(descriptor);
        let payload = match status {
            PluginStatus::Registered => EventPayload::PluginRegistered(lifecycle),
            PluginStatus::Initialized => EventPayload::PluginInitialized(lifecycle),
            PluginStatus::Enabled => EventPayload::PluginEnabled(lifecycle),
            PluginStatus::Disabled => EventPayload::PluginDisabled(lifecycle),
            PluginStatus::Discovered => return,
        };
        let report = self.bus.publish(DomainEvent::new(payload)).await;
        for (handler, e) in report.failures() {
            warn!(plugin = %descriptor.name, handler = %handler, error = %e, "Lifecycle event handler failed");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ConfigKind;
    use crate::store::{MemoryStateStore, StoreError};
    use async_trait::async_trait;
    use remit_core::{CapabilityProvider, EventKind, PluginCategory, ProviderResult, handler_fn};
    use semver::Version;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Widget {
        teardowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CapabilityProvider for Widget {
        fn category(&self) -> PluginCategory {
            PluginCategory::Analytics
        }

        async fn teardown(&self) -> ProviderResult<()> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn widget(name: &str, version: &str) -> PluginDescriptor {
        PluginDescriptor::new(name, Version::parse(version).unwrap(), PluginCategory::Analytics)
    }

    fn widget_factory(teardowns: Arc<AtomicUsize>) -> ProviderFactory {
        provider_factory(move |_config, _cancel| {
            let teardowns = Arc::clone(&teardowns);
            async move { Ok::<_, BoxError>(Capability::Extension(Arc::new(Widget { teardowns }))) }
        })
    }

    struct Fixture {
        registry: PluginRegistry,
        store: Arc<MemoryStateStore>,
        teardowns: Arc<AtomicUsize>,
        bus: Arc<EventBus>,
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryStateStore::new(), RegistryConfig::default())
    }

    fn fixture_with(store: MemoryStateStore, config: RegistryConfig) -> Fixture {
        let bus = Arc::new(EventBus::default());
        let store = Arc::new(store);
        let registry = PluginRegistry::with_config(
            Arc::clone(&bus),
            Arc::clone(&store) as Arc<dyn PluginStateStore>,
            config,
        );
        Fixture {
            registry,
            store,
            teardowns: Arc::new(AtomicUsize::new(0)),
            bus,
        }
    }

    impl Fixture {
        async fn add(&self, desc: PluginDescriptor) {
            self.registry
                .register(desc, widget_factory(Arc::clone(&self.teardowns)))
                .await
                .unwrap();
        }

        async fn bring_up(&self, name: &str) {
            self.registry
                .initialize(name, PluginConfig::new())
                .await
                .unwrap();
            self.registry.enable(name).await.unwrap();
        }

        /// No Enabled plugin may have a missing or non-Enabled dependency.
        fn assert_invariant(&self) {
            for name in self.registry.enabled_plugins() {
                let desc = self.registry.descriptor(&name).unwrap();
                for dep in &desc.dependencies {
                    assert_eq!(
                        self.registry.status(&dep.name),
                        Some(PluginStatus::Enabled),
                        "{name} is enabled but its dependency {} is not",
                        dep.name
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn test_register_emits_event_and_rejects_duplicates() {
        let fx = fixture();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        fx.bus.subscribe(
            EventKind::PluginRegistered,
            handler_fn("count", move |_ctx| {
                let s = Arc::clone(&s);
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            }),
            0,
        );

        fx.add(widget("charts", "1.0.0")).await;
        assert_eq!(fx.registry.status("charts"), Some(PluginStatus::Registered));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        let err = fx
            .registry
            .register(widget("charts", "2.0.0"), widget_factory(Arc::clone(&fx.teardowns)))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::DuplicateName(n) if n == "charts"));
    }

    #[tokio::test]
    async fn test_full_lifecycle_persists_and_tears_down() {
        let fx = fixture();
        fx.add(widget("charts", "1.0.0")).await;

        fx.bring_up("charts").await;
        assert!(fx.registry.capability("charts").is_some());
        assert_eq!(
            fx.store.snapshot()["charts"].status,
            PluginStatus::Enabled
        );

        let disabled = fx.registry.disable("charts", false).await.unwrap();
        assert_eq!(disabled, vec!["charts"]);
        assert_eq!(fx.teardowns.load(Ordering::SeqCst), 1);
        assert!(fx.registry.capability("charts").is_none());

        fx.registry.uninstall("charts").await.unwrap();
        assert_eq!(fx.registry.status("charts"), None);
        assert!(fx.store.snapshot().is_empty());
        // Provider was already released on disable.
        assert_eq!(fx.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uninstall_requires_disabled() {
        let fx = fixture();
        fx.add(widget("charts", "1.0.0")).await;
        let err = fx.registry.uninstall("charts").await.unwrap_err();
        assert!(matches!(
            err,
            PluginError::InvalidTransition {
                status: PluginStatus::Registered,
                action: "uninstall",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_initialization_leaves_plugin_registered() {
        let fx = fixture();
        fx.registry
            .register(
                widget("flaky", "1.0.0"),
                provider_factory(|_config, _cancel| async {
                    Err::<Capability, BoxError>("gateway unreachable".into())
                }),
            )
            .await
            .unwrap();

        let err = fx
            .registry
            .initialize("flaky", PluginConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(&err, PluginError::Initialization { source, .. }
            if source.to_string() == "gateway unreachable"));
        assert_eq!(fx.registry.status("flaky"), Some(PluginStatus::Registered));
        assert!(fx.store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_category_mismatch_releases_provider() {
        let fx = fixture();
        let desc = PluginDescriptor::new(
            "gateway",
            Version::parse("1.0.0").unwrap(),
            PluginCategory::Payment,
        );
        fx.registry
            .register(desc, widget_factory(Arc::clone(&fx.teardowns)))
            .await
            .unwrap();

        let err = fx
            .registry
            .initialize("gateway", PluginConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Initialization { ref name, .. } if name == "gateway"));
        assert_eq!(fx.teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(fx.registry.status("gateway"), Some(PluginStatus::Registered));
        assert!(fx.registry.capability("gateway").is_none());
    }

    #[tokio::test]
    async fn test_initialization_timeout() {
        let fx = fixture_with(
            MemoryStateStore::new(),
            RegistryConfig {
                init_timeout: Duration::from_millis(50),
            },
        );
        fx.registry
            .register(
                widget("slow", "1.0.0"),
                provider_factory(|_config, _cancel| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Err::<Capability, BoxError>("unreachable".into())
                }),
            )
            .await
            .unwrap();

        let err = fx
            .registry
            .initialize("slow", PluginConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::InitializationTimeout { .. }));
        assert_eq!(fx.registry.status("slow"), Some(PluginStatus::Registered));
    }

    #[tokio::test]
    async fn test_initialization_cancelled() {
        let fx = fixture();
        fx.add(widget("charts", "1.0.0")).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fx
            .registry
            .initialize_with("charts", PluginConfig::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::InitializationCancelled(_)));
    }

    #[tokio::test]
    async fn test_config_validated_against_schema() {
        let fx = fixture();
        fx.add(widget("charts", "1.0.0").config_field("endpoint", ConfigKind::String, true))
            .await;

        let err = fx
            .registry
            .initialize("charts", PluginConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Configuration { .. }));
        assert_eq!(fx.registry.status("charts"), Some(PluginStatus::Registered));

        fx.registry
            .initialize("charts", PluginConfig::new().with("endpoint", "https://x"))
            .await
            .unwrap();
        assert_eq!(
            fx.registry.config("charts").unwrap().get_str("endpoint"),
            Some("https://x")
        );
    }

    #[tokio::test]
    async fn test_enable_requires_enabled_dependencies() {
        let fx = fixture();
        fx.add(widget("a", "2.1.0")).await;
        fx.add(widget("b", "1.0.0").depends_on("a", "^2.0.0".parse().unwrap()))
            .await;

        fx.registry.initialize("b", PluginConfig::new()).await.unwrap();
        let err = fx.registry.enable("b").await.unwrap_err();
        assert!(matches!(err, PluginError::DependencyNotEnabled { dependency, .. } if dependency == "a"));

        fx.bring_up("a").await;
        fx.registry.enable("b").await.unwrap();
        assert_eq!(fx.registry.enabled_plugins(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_disable_with_active_dependent() {
        let fx = fixture();
        fx.add(widget("a", "1.0.0")).await;
        fx.add(widget("b", "1.0.0").depends_on("a", "*".parse().unwrap()))
            .await;
        fx.add(widget("c", "1.0.0").depends_on("b", "*".parse().unwrap()))
            .await;
        for name in ["a", "b", "c"] {
            fx.bring_up(name).await;
        }

        let err = fx.registry.disable("a", false).await.unwrap_err();
        match err {
            PluginError::DependentPluginActive { name, dependents } => {
                assert_eq!(name, "a");
                assert_eq!(dependents, vec!["b", "c"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fx.registry.status("a"), Some(PluginStatus::Enabled));

        let disabled = fx.registry.disable("a", true).await.unwrap();
        assert_eq!(disabled, vec!["c", "b", "a"]);
        assert!(fx.registry.enabled_plugins().is_empty());
        assert_eq!(fx.teardowns.load(Ordering::SeqCst), 3);
        fx.assert_invariant();
    }

    #[tokio::test]
    async fn test_invariant_holds_across_operation_sequences() {
        let fx = fixture();
        fx.add(widget("a", "1.0.0")).await;
        fx.add(widget("b", "1.0.0").depends_on("a", "*".parse().unwrap()))
            .await;
        fx.add(widget("c", "1.0.0").depends_on("a", "*".parse().unwrap()))
            .await;

        let ops: &[(&str, &str)] = &[
            ("enable", "b"),
            ("init", "b"),
            ("enable", "b"),
            ("init", "a"),
            ("enable", "a"),
            ("enable", "b"),
            ("disable", "a"),
            ("init", "c"),
            ("enable", "c"),
            ("uninstall", "a"),
            ("force", "a"),
            ("enable", "b"),
            ("init", "a"),
            ("enable", "a"),
            ("enable", "c"),
            ("uninstall", "b"),
            ("disable", "b"),
            ("uninstall", "b"),
            ("disable", "c"),
            ("disable", "a"),
            ("uninstall", "a"),
            ("enable", "c"),
        ];
        for (op, name) in ops {
            let _ = match *op {
                "init" => fx.registry.initialize(name, PluginConfig::new()).await,
                "enable" => fx.registry.enable(name).await,
                "disable" => fx.registry.disable(name, false).await.map(|_| ()),
                "force" => fx.registry.disable(name, true).await.map(|_| ()),
                "uninstall" => fx.registry.uninstall(name).await,
                _ => unreachable!(),
            };
            fx.assert_invariant();
        }
        assert_eq!(fx.registry.plugin_names(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_resolve_reports_version_conflict() {
        let fx = fixture();
        fx.add(widget("a", "1.5.0")).await;
        fx.add(widget("b", "1.0.0").depends_on("a", "^2.0.0".parse().unwrap()))
            .await;

        let err = fx.registry.resolve_dependencies().unwrap_err();
        assert!(matches!(err, PluginError::VersionConstraint { ref dependency, .. } if dependency == "a"));
        assert!(err.is_dependency_error());
    }

    #[tokio::test]
    async fn test_restore_reapplies_persisted_state() {
        let mut records = BTreeMap::new();
        records.insert(
            "a".to_string(),
            PersistedPlugin {
                status: PluginStatus::Enabled,
                config: PluginConfig::new().with("theme", "dark"),
            },
        );
        records.insert(
            "b".to_string(),
            PersistedPlugin {
                status: PluginStatus::Disabled,
                config: PluginConfig::new(),
            },
        );
        records.insert(
            "gone".to_string(),
            PersistedPlugin {
                status: PluginStatus::Enabled,
                config: PluginConfig::new(),
            },
        );
        let fx = fixture_with(MemoryStateStore::with_records(records), RegistryConfig::default());
        fx.add(widget("a", "1.0.0")).await;
        fx.add(widget("b", "1.0.0").depends_on("a", "*".parse().unwrap()))
            .await;

        let summary = fx.registry.restore().await.unwrap();

        assert_eq!(fx.registry.status("a"), Some(PluginStatus::Enabled));
        assert_eq!(fx.registry.status("b"), Some(PluginStatus::Disabled));
        assert_eq!(
            fx.registry.config("a").unwrap().get_str("theme"),
            Some("dark")
        );
        assert_eq!(summary.restored.len(), 2);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.unknown, vec!["gone"]);
    }

    #[tokio::test]
    async fn test_independent_plugins_transition_concurrently() {
        let fx = fixture();
        fx.add(widget("a", "1.0.0")).await;
        fx.add(widget("b", "1.0.0")).await;

        let (ra, rb) = tokio::join!(
            fx.registry.initialize("a", PluginConfig::new()),
            fx.registry.initialize("b", PluginConfig::new()),
        );
        ra.unwrap();
        rb.unwrap();

        // Same plugin twice: the second call observes Initialized and is rejected.
        fx.add(widget("c", "1.0.0")).await;
        let (r1, r2) = tokio::join!(
            fx.registry.initialize("c", PluginConfig::new()),
            fx.registry.initialize("c", PluginConfig::new()),
        );
        assert!(r1.is_ok() ^ r2.is_ok());
    }

    #[tokio::test]
    async fn test_disable_all_releases_in_reverse_order() {
        let fx = fixture();
        fx.add(widget("a", "1.0.0")).await;
        fx.add(widget("b", "1.0.0").depends_on("a", "*".parse().unwrap()))
            .await;
        fx.bring_up("a").await;
        fx.bring_up("b").await;

        let disabled = fx.registry.disable_all().await;
        assert_eq!(disabled, vec!["b", "a"]);
        assert_eq!(fx.teardowns.load(Ordering::SeqCst), 2);
    }

    /// Store whose writes fail while `broken` is set.
    #[derive(Default)]
    struct BrokenStore {
        inner: MemoryStateStore,
        broken: AtomicBool,
    }

    impl BrokenStore {
        fn set_broken(&self, broken: bool) {
            self.broken.store(broken, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PluginStateStore for BrokenStore {
        async fn load_all(&self) -> Result<BTreeMap<String, PersistedPlugin>, StoreError> {
            self.inner.load_all().await
        }

        async fn save(&self, name: &str, record: &PersistedPlugin) -> Result<(), StoreError> {
            self.check()?;
            self.inner.save(name, record).await
        }

        async fn remove(&self, name: &str) -> Result<(), StoreError> {
            self.check()?;
            self.inner.remove(name).await
        }
    }

    #[tokio::test]
    async fn test_failed_state_write_is_returned_and_rolled_back() {
        let store = Arc::new(BrokenStore::default());
        let registry = PluginRegistry::new(
            Arc::new(EventBus::default()),
            Arc::clone(&store) as Arc<dyn PluginStateStore>,
        );
        let teardowns = Arc::new(AtomicUsize::new(0));
        registry
            .register(widget("charts", "1.0.0"), widget_factory(Arc::clone(&teardowns)))
            .await
            .unwrap();

        store.set_broken(true);
        let err = registry
            .initialize("charts", PluginConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Persistence { ref name, .. } if name == "charts"));
        assert_eq!(registry.status("charts"), Some(PluginStatus::Registered));
        assert!(registry.capability("charts").is_none());
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);

        store.set_broken(false);
        registry
            .initialize("charts", PluginConfig::new())
            .await
            .unwrap();

        store.set_broken(true);
        assert!(matches!(
            registry.enable("charts").await,
            Err(PluginError::Persistence { .. })
        ));
        assert_eq!(registry.status("charts"), Some(PluginStatus::Initialized));
        assert_eq!(
            store.inner.snapshot()["charts"].status,
            PluginStatus::Initialized
        );

        store.set_broken(false);
        registry.enable("charts").await.unwrap();
        store.set_broken(true);
        assert!(matches!(
            registry.disable("charts", false).await,
            Err(PluginError::Persistence { .. })
        ));
        assert_eq!(registry.status("charts"), Some(PluginStatus::Disabled));
        assert_eq!(
            store.inner.snapshot()["charts"].status,
            PluginStatus::Enabled
        );
    }

    #[tokio::test]
    async fn test_release_all_keeps_persisted_state() {
        let fx = fixture();
        fx.add(widget("a", "1.0.0")).await;
        fx.add(widget("b", "1.0.0").depends_on("a", "*".parse().unwrap()))
            .await;
        fx.bring_up("a").await;
        fx.bring_up("b").await;

        let released = fx.registry.release_all().await;
        assert_eq!(released, vec!["b", "a"]);
        assert_eq!(fx.teardowns.load(Ordering::SeqCst), 2);
        assert!(fx.registry.payment_providers().is_empty());
        assert_eq!(fx.registry.status("a"), Some(PluginStatus::Disabled));

        let saved = fx.store.snapshot();
        assert_eq!(saved["a"].status, PluginStatus::Enabled);
        assert_eq!(saved["b"].status, PluginStatus::Enabled);
    }
}
