//! String-keyed preference storage
//!
//! The repository list and other small pieces of state are persisted through
//! [`KeyValueStore`]. Writes are synchronous and durable once `put_string` returns.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::core::error::{BridgeError, Result};

pub trait KeyValueStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;

    fn put_string(&self, key: &str, value: &str) -> Result<()>;

    /// Read a value, falling back to `default` when absent
    fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }
}

/// Write-through store backed by a single JSON object file
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store, reading existing values if the file is present
    ///
    /// A corrupt file is logged and treated as empty rather than failing startup.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(values) => values,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable preferences file");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn put_string(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|e| BridgeError::Config(format!("Preferences lock poisoned: {}", e)))?;

        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }
}

/// Volatile store for tests and one-shot CLI runs
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn put_string(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .map_err(|e| BridgeError::Config(format!("Preferences lock poisoned: {}", e)))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
