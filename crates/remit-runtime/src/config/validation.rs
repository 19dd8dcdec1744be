//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    BusSettings, LogOutput, LoggingConfig, PaymentSettings, PluginSettings, RemitConfig,
};

/// Validates the entire configuration.
pub fn validate_config(config: &RemitConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;
    validate_bus(&config.bus)?;
    validate_plugins(&config.plugins)?;
    validate_payments(&config.payments)?;

    if config.webhooks.verify_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "webhooks.verify_timeout_ms must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if logging.filters.keys().any(|module| module.trim().is_empty()) {
        return Err(ConfigError::validation(
            "logging.filters contains an empty module name",
        ));
    }

    Ok(())
}

fn validate_bus(bus: &BusSettings) -> ConfigResult<()> {
    if bus.handler_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "bus.handler_timeout_ms must be greater than 0",
        ));
    }

    if bus.max_follow_up_depth == 0 {
        return Err(ConfigError::validation(
            "bus.max_follow_up_depth must be at least 1",
        ));
    }

    Ok(())
}

fn validate_plugins(plugins: &PluginSettings) -> ConfigResult<()> {
    if plugins.init_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "plugins.init_timeout_ms must be greater than 0",
        ));
    }

    if let Some(path) = &plugins.state_file
        && path.as_os_str().is_empty()
    {
        return Err(ConfigError::validation("plugins.state_file must not be empty"));
    }

    if plugins.settings.keys().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::validation(
            "plugins.settings contains an empty plugin name",
        ));
    }

    Ok(())
}

fn validate_payments(payments: &PaymentSettings) -> ConfigResult<()> {
    if payments.max_retries > 0 && payments.retry_base_delay_ms == 0 {
        return Err(ConfigError::validation(
            "payments.retry_base_delay_ms must be greater than 0 when retries are enabled",
        ));
    }

    if payments.idempotency_ttl_secs == 0 {
        return Err(ConfigError::validation(
            "payments.idempotency_ttl_secs must be greater than 0",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use remit_plugin::PluginConfig;

    use super::*;
    use crate::config::schema::LogLevel;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&RemitConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = RemitConfig::default();
        config.bus.handler_timeout_ms = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));

        let mut config = RemitConfig::default();
        config.plugins.init_timeout_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = RemitConfig::default();
        config.webhooks.verify_timeout_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_payment_settings_validated() {
        let mut config = RemitConfig::default();
        config.payments.retry_base_delay_ms = 0;
        assert!(validate_config(&config).is_err());

        config.payments.max_retries = 0;
        assert!(validate_config(&config).is_ok());

        let mut config = RemitConfig::default();
        config.payments.idempotency_ttl_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_follow_up_depth_rejected() {
        let mut config = RemitConfig::default();
        config.bus.max_follow_up_depth = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_file_output_requires_path() {
        let mut config = RemitConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.logging.file_path = Some(PathBuf::from("remit.log"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_names_rejected() {
        let mut config = RemitConfig::default();
        config.logging.filters.insert(" ".into(), LogLevel::Debug);
        assert!(validate_config(&config).is_err());

        let mut config = RemitConfig::default();
        config
            .plugins
            .settings
            .insert(String::new(), PluginConfig::default());
        assert!(validate_config(&config).is_err());
    }
}
