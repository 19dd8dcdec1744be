//! Configuration module for the Remit runtime.
//!
//! Layered loading through figment, the configuration schema, and
//! validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BusSettings, LogFormat, LogLevel, LogOutput, LoggingConfig, PaymentSettings, PluginSettings,
    RemitConfig, SpanEventConfig, WebhookSettings,
};
pub use validation::validate_config;
