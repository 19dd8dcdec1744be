//! Persisted plugin state.
//!
//! Plugin status and configuration are stored as a flat registry keyed by
//! plugin name, which is all that is needed to rebuild Enabled/Disabled state
//! on restart (see [`PluginRegistry::restore`](crate::PluginRegistry::restore)).

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::{PluginConfig, PluginStatus};

/// The persisted record of one plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedPlugin {
    pub status: PluginStatus,
    #[serde(default)]
    pub config: PluginConfig,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("plugin state I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("plugin state is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Key → value store for plugin state.
#[async_trait]
pub trait PluginStateStore: Send + Sync + 'static {
    async fn load_all(&self) -> Result<BTreeMap<String, PersistedPlugin>, StoreError>;

    async fn save(&self, name: &str, record: &PersistedPlugin) -> Result<(), StoreError>;

    async fn remove(&self, name: &str) -> Result<(), StoreError>;
}

/// In-process store; the default when no file is configured.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<BTreeMap<String, PersistedPlugin>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store, e.g. to simulate a previous run.
    pub fn with_records(records: BTreeMap<String, PersistedPlugin>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, PersistedPlugin> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl PluginStateStore for MemoryStateStore {
    async fn load_all(&self) -> Result<BTreeMap<String, PersistedPlugin>, StoreError> {
        Ok(self.snapshot())
    }

    async fn save(&self, name: &str, record: &PersistedPlugin) -> Result<(), StoreError> {
        self.records.lock().insert(name.to_string(), record.clone());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.records.lock().remove(name);
        Ok(())
    }
}
