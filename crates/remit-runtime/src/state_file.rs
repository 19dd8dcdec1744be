//! Plugin state persisted to a JSON file.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use remit_plugin::{PersistedPlugin, PluginStateStore, StoreError};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// A [`PluginStateStore`] backed by one JSON object keyed by plugin name.
///
/// A missing file reads as empty state. Every write rewrites the whole file
/// through a sibling temp file and a rename.
#[derive(Debug)]
pub struct JsonFileStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<BTreeMap<String, PersistedPlugin>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, records: &BTreeMap<String, PersistedPlugin>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(records)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        trace!(path = %self.path.display(), plugins = records.len(), "Plugin state written");
        Ok(())
    }
}

#[async_trait]
impl PluginStateStore for JsonFileStateStore {
    async fn load_all(&self) -> Result<BTreeMap<String, PersistedPlugin>, StoreError> {
        let records = self.read().await?;
        debug!(path = %self.path.display(), plugins = records.len(), "Plugin state loaded");
        Ok(records)
    }

    async fn save(&self, name: &str, record: &PersistedPlugin) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read().await?;
        records.insert(name.to_string(), record.clone());
        self.write(&records).await
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read().await?;
        if records.remove(name).is_some() {
            self.write(&records).await?;
        }
        Ok(())
    }
}
