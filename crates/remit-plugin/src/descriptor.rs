//! Plugin metadata, lifecycle status and configuration.

use std::collections::BTreeMap;
use std::fmt;

use remit_core::PluginCategory;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::version::VersionConstraint;

// =============================================================================
// PluginStatus
// =============================================================================

/// Lifecycle status of a plugin.
///
/// ```text
/// register()   ──► Discovered ──► Registered
/// initialize() ──► Initialized        (from Registered or Disabled)
/// enable()     ──► Enabled            (from Initialized)
/// disable()    ──► Disabled           (from Enabled, Initialized or Registered)
/// uninstall()  ──► removed            (from Disabled)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Discovered,
    Registered,
    Initialized,
    Enabled,
    Disabled,
}

impl PluginStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Registered => "registered",
            Self::Initialized => "initialized",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }

    /// Whether a provider instance exists in this status.
    pub fn holds_provider(self) -> bool {
        matches!(self, Self::Initialized | Self::Enabled)
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// A scalar configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    fn kind(&self) -> ConfigKind {
        match self {
            Self::Bool(_) => ConfigKind::Bool,
            Self::Integer(_) => ConfigKind::Integer,
            Self::Float(_) => ConfigKind::Float,
            Self::String(_) => ConfigKind::String,
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Expected type of a configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKind {
    Bool,
    Integer,
    Float,
    String,
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
        })
    }
}

/// One declared configuration key.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigField {
    pub key: String,
    pub kind: ConfigKind,
    pub required: bool,
    pub default: Option<ConfigValue>,
}

/// Opaque key → scalar configuration blob handed to a provider factory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginConfig(BTreeMap<String, ConfigValue>);

impl PluginConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(ConfigValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(ConfigValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(ConfigValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.0.get(key) {
            Some(ConfigValue::Float(f)) => Some(*f),
            Some(ConfigValue::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.0.iter()
    }

    /// Checks the blob against a schema and fills in declared defaults.
    ///
    /// Keys not named by the schema are kept untouched.
    pub fn validate(&self, schema: &[ConfigField]) -> Result<PluginConfig, String> {
        let mut out = self.clone();
        for field in schema {
            match self.0.get(&field.key) {
                Some(value) => {
                    let ok = value.kind() == field.kind
                        || (field.kind == ConfigKind::Float && value.kind() == ConfigKind::Integer);
                    if !ok {
                        return Err(format!(
                            "key '{}' must be {}, got {}",
                            field.key,
                            field.kind,
                            value.kind()
                        ));
                    }
                }
                None => match &field.default {
                    Some(default) => {
                        out.0.insert(field.key.clone(), default.clone());
                    }
                    None if field.required => {
                        return Err(format!("missing required key '{}'", field.key));
                    }
                    None => {}
                },
            }
        }
        Ok(out)
    }
}

impl FromIterator<(String, ConfigValue)> for PluginConfig {
    fn from_iter<I: IntoIterator<Item = (String, ConfigValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// =============================================================================
// PluginDescriptor
// =============================================================================

/// A declared dependency on another plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub constraint: VersionConstraint,
}

/// Static plugin metadata.
///
/// # Example
///
/// ```rust,ignore
/// let desc = PluginDescriptor::new("stripe_tax", Version::new(1, 2, 0), PluginCategory::Payment)
///     .description("Tax calculation on top of the card gateway")
///     .depends_on("stripe", "^2.0.0".parse()?)
///     .config_field("api_key", ConfigKind::String, true);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: Version,
    pub description: String,
    pub category: PluginCategory,
    pub dependencies: Vec<Dependency>,
    pub config_schema: Vec<ConfigField>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: Version, category: PluginCategory) -> Self {
        Self {
            name: name.into(),
            version,
            description: String::new(),
            category,
            dependencies: Vec::new(),
            config_schema: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>, constraint: VersionConstraint) -> Self {
        self.dependencies.push(Dependency {
            name: name.into(),
            constraint,
        });
        self
    }

    pub fn config_field(mut self, key: impl Into<String>, kind: ConfigKind, required: bool) -> Self {
        self.config_schema.push(ConfigField {
            key: key.into(),
            kind,
            required,
            default: None,
        });
        self
    }

    /// Declares an optional key with a default value.
    pub fn config_default(mut self, key: impl Into<String>, default: impl Into<ConfigValue>) -> Self {
        let default = default.into();
        self.config_schema.push(ConfigField {
            key: key.into(),
            kind: default.kind(),
            required: false,
            default: Some(default),
        });
        self
    }

    pub fn depends_on_name(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d.name == name)
    }
}
