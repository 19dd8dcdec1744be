//! Mock provider configuration.
//!
//! Read from the plugin's initialization config:
//!
//! ```toml
//! [plugins.settings.mock_payment]
//! webhook_secret = "test_secret"
//! latency_ms = 0
//! fail = false
//! ```

use std::time::Duration;

use remit_plugin::PluginConfig;

pub const DEFAULT_WEBHOOK_SECRET: &str = "test_secret";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockProviderConfig {
    /// HMAC-SHA256 key for webhook signatures.
    pub webhook_secret: String,
    /// Artificial delay before every provider call.
    pub latency: Option<Duration>,
    /// Start with every payment call failing.
    pub fail: bool,
}

impl Default for MockProviderConfig {
    fn default() -> Self {
        Self {
            webhook_secret: DEFAULT_WEBHOOK_SECRET.to_string(),
            latency: None,
            fail: false,
        }
    }
}

impl MockProviderConfig {
    pub fn from_plugin_config(config: &PluginConfig) -> Self {
        let defaults = Self::default();
        Self {
            webhook_secret: config
                .get_str("webhook_secret")
                .map(str::to_string)
                .unwrap_or(defaults.webhook_secret),
            latency: config
                .get_int("latency_ms")
                .filter(|ms| *ms > 0)
                .map(|ms| Duration::from_millis(ms.unsigned_abs())),
            fail: config.get_bool("fail").unwrap_or(defaults.fail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_overrides() {
        assert_eq!(
            MockProviderConfig::from_plugin_config(&PluginConfig::new()),
            MockProviderConfig::default()
        );

        let config = PluginConfig::new()
            .with("webhook_secret", "whsec_1")
            .with("latency_ms", 25i64)
            .with("fail", true);
        let parsed = MockProviderConfig::from_plugin_config(&config);
        assert_eq!(parsed.webhook_secret, "whsec_1");
        assert_eq!(parsed.latency, Some(Duration::from_millis(25)));
        assert!(parsed.fail);
    }
}
