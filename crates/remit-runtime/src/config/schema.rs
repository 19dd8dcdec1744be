//! Configuration schema definitions.
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "compact"
//!
//! [bus]
//! handler_timeout_ms = 5000
//! max_follow_up_depth = 4
//!
//! [plugins]
//! state_file = "plugins.json"
//! init_timeout_ms = 10000
//!
//! [plugins.settings.mock_payment]
//! webhook_secret = "test_secret"
//!
//! [webhooks]
//! verify_timeout_ms = 3000
//!
//! [payments]
//! max_retries = 3
//! retry_base_delay_ms = 100
//! idempotency_ttl_secs = 86400
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use remit_core::BusConfig;
use remit_plugin::{PluginConfig, RegistryConfig};
use serde::{Deserialize, Serialize};

use crate::gateway::RetryPolicy;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemitConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub plugins: PluginSettings,

    #[serde(default)]
    pub webhooks: WebhookSettings,

    #[serde(default)]
    pub payments: PaymentSettings,
}

// =============================================================================
// Logging
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Target file when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file name and line number.
    #[serde(default)]
    pub file_location: bool,

    /// Per-module levels, e.g. `remit_plugin = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,
}

// =============================================================================
// Bus
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    /// Deadline of a single handler call.
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,

    /// Maximum nesting of follow-up events.
    #[serde(default = "default_max_follow_up_depth")]
    pub max_follow_up_depth: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            handler_timeout_ms: default_handler_timeout_ms(),
            max_follow_up_depth: default_max_follow_up_depth(),
        }
    }
}

impl BusSettings {
    pub fn to_bus_config(&self) -> BusConfig {
        BusConfig {
            handler_timeout: Duration::from_millis(self.handler_timeout_ms),
            max_follow_up_depth: self.max_follow_up_depth,
        }
    }
}

fn default_handler_timeout_ms() -> u64 {
    5000
}

fn default_max_follow_up_depth() -> usize {
    4
}

// =============================================================================
// Plugins
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettings {
    /// JSON file persisting plugin status and config. In-memory when unset.
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// Deadline of a provider factory.
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,

    /// Initialization config per plugin name.
    #[serde(default)]
    pub settings: BTreeMap<String, PluginConfig>,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            state_file: None,
            init_timeout_ms: default_init_timeout_ms(),
            settings: BTreeMap::new(),
        }
    }
}

impl PluginSettings {
    pub fn to_registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            init_timeout: Duration::from_millis(self.init_timeout_ms),
        }
    }

    /// The configured settings for `name`, or an empty config.
    pub fn config_for(&self, name: &str) -> PluginConfig {
        self.settings.get(name).cloned().unwrap_or_default()
    }
}

fn default_init_timeout_ms() -> u64 {
    10000
}

// =============================================================================
// Webhooks
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Deadline for a provider's signature verification.
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            verify_timeout_ms: default_verify_timeout_ms(),
        }
    }
}

impl WebhookSettings {
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }
}

fn default_verify_timeout_ms() -> u64 {
    3000
}

// =============================================================================
// Payments
// =============================================================================

/// Retry and idempotency of provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    /// Retries of a call failing with a transient error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, doubled for each further one.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// How long a successful response is replayed for the same key.
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
        }
    }
}

impl PaymentSettings {
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_idempotency_ttl_secs() -> u64 {
    24 * 60 * 60
}
