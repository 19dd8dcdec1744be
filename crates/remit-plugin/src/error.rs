//! Error types for the plugin runtime.

use std::time::Duration;

use remit_core::ProviderError;
use thiserror::Error;

use crate::descriptor::PluginStatus;
use crate::store::StoreError;

/// Boxed error returned by provider factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned synchronously by [`PluginRegistry`](crate::PluginRegistry)
/// operations and by dependency resolution.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{0}' is already registered")]
    DuplicateName(String),

    #[error("plugin '{0}' is not registered")]
    NotFound(String),

    /// The dependency graph contains a cycle; `cycle` lists the path with
    /// its starting plugin repeated at the end.
    #[error("cyclic plugin dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("plugin '{plugin}' requires '{dependency}' {constraint}, but version {found} is registered")]
    VersionConstraint {
        plugin: String,
        dependency: String,
        constraint: String,
        found: String,
    },

    #[error("plugin '{plugin}' depends on '{dependency}', which is not registered")]
    MissingDependency { plugin: String, dependency: String },

    #[error("invalid version constraint '{constraint}': {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    #[error("invalid configuration for plugin '{name}': {message}")]
    Configuration { name: String, message: String },

    /// The provider factory failed; `source` is the provider's own error.
    #[error("plugin '{name}' failed to initialize: {source}")]
    Initialization {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("plugin '{name}' did not initialize within {timeout:?}")]
    InitializationTimeout { name: String, timeout: Duration },

    #[error("initialization of plugin '{0}' was cancelled")]
    InitializationCancelled(String),

    #[error("plugin '{name}' cannot {action} while {status}")]
    InvalidTransition {
        name: String,
        status: PluginStatus,
        action: &'static str,
    },

    #[error("plugin '{name}' is required by enabled plugins: {}", dependents.join(", "))]
    DependentPluginActive {
        name: String,
        dependents: Vec<String>,
    },

    #[error("plugin '{name}' requires '{dependency}' to be enabled")]
    DependencyNotEnabled { name: String, dependency: String },

    #[error("teardown of plugin '{name}' failed: {source}")]
    Teardown {
        name: String,
        #[source]
        source: ProviderError,
    },

    /// The transition could not be written to the state store.
    #[error("state of plugin '{name}' could not be persisted: {source}")]
    Persistence {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PluginError {
    pub fn configuration(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_transition(
        name: impl Into<String>,
        status: PluginStatus,
        action: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            name: name.into(),
            status,
            action,
        }
    }

    /// `true` for resolution failures, which are terminal and not retryable.
    pub fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            Self::CyclicDependency { .. }
                | Self::VersionConstraint { .. }
                | Self::MissingDependency { .. }
        )
    }
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
