//! # Remit Plugin
//!
//! The plugin runtime: descriptors with semantic versions and declared
//! dependencies, a deterministic dependency resolver, and the
//! [`PluginRegistry`] that drives each plugin through its lifecycle while
//! owning its capability provider.
//!
//! The same registry serves server-side payment plugins and client-side
//! extensions; only the [`PluginCategory`](remit_core::PluginCategory) and
//! the [`Capability`](remit_core::Capability) variant differ.

pub mod descriptor;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod version;

pub use descriptor::{
    ConfigField, ConfigKind, ConfigValue, Dependency, PluginConfig, PluginDescriptor, PluginStatus,
};
pub use error::{BoxError, PluginError, PluginResult};
pub use registry::{
    PluginRegistry, ProviderFactory, RegistryConfig, RestoreSummary, provider_factory,
};
pub use resolver::resolve;
pub use store::{MemoryStateStore, PersistedPlugin, PluginStateStore, StoreError};
pub use version::VersionConstraint;
