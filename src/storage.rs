//! JSON snapshot storage.
//!
//! The executor treats storage purely through the [`JsonStorage`] interface:
//! `save` with an auto-generated key on every optimize, `load` with the most
//! recent key on resume. [`LocalJsonStorage`] is the concrete, file-backed
//! implementation; [`InMemoryJsonStorage`] is a durable-within-process
//! stand-in used by tests.

use std::path::PathBuf;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors raised by storage operations.
#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    /// The requested key does not exist.
    #[error("no snapshot found for key {key}")]
    #[diagnostic(code(labsched::storage::not_found))]
    NotFound { key: String },

    /// Filesystem I/O failed.
    #[error("storage I/O error: {message}")]
    #[diagnostic(code(labsched::storage::io))]
    Io { message: String },

    /// The stored bytes were not valid JSON.
    #[error("corrupt snapshot {key}: {message}")]
    #[diagnostic(code(labsched::storage::corrupt))]
    Corrupt { key: String, message: String },
}

/// Append-only snapshot storage: every `save` writes a new entry, `load`
/// reads one back by key.
#[async_trait]
pub trait JsonStorage: Send + Sync {
    /// Persist `value` under `key`, or an auto-generated key if `None`.
    /// Returns the key actually used. Must be atomic relative to `load`:
    /// a reader never observes a torn write.
    async fn save(&self, value: &Value, key: Option<String>) -> Result<String, StorageError>;

    /// Load the snapshot stored under `key`.
    async fn load(&self, key: &str) -> Result<Value, StorageError>;

    /// The most recently written key, by name order, or `None` if nothing
    /// has been saved yet.
    async fn latest_key(&self) -> Result<Option<String>, StorageError>;

    /// Convenience: load the snapshot under [`latest_key`](Self::latest_key).
    async fn load_latest(&self) -> Result<Option<Value>, StorageError> {
        match self.latest_key().await? {
            Some(key) => self.load(&key).await.map(Some),
            None => Ok(None),
        }
    }
}

fn generate_key() -> String {
    let now = chrono::Utc::now().format("%Y%m%dT%H%M%S%.6f");
    let random: u32 = rand::random();
    format!("{now}_{random:08x}.json")
}

/// Filesystem-backed [`JsonStorage`]: one `<timestamp>_<random>.json` file
/// per save, in a directory per run (spec §6.2).
pub struct LocalJsonStorage {
    base_dir: PathBuf,
}

impl LocalJsonStorage {
    /// Open (creating if necessary) a storage directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }
}

#[async_trait]
impl JsonStorage for LocalJsonStorage {
    async fn save(&self, value: &Value, key: Option<String>) -> Result<String, StorageError> {
        let key = key.unwrap_or_else(generate_key);
        let path = self.base_dir.join(&key);
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Io {
            message: e.to_string(),
        })?;
        // Write to a sibling temp file and rename, so a reader never
        // observes a torn file.
        let tmp_path = self.base_dir.join(format!("{key}.tmp"));
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| StorageError::Io {
                message: e.to_string(),
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StorageError::Io {
                message: e.to_string(),
            })?;
        tracing::info!(key = %key, "snapshot saved");
        Ok(key)
    }

    async fn load(&self, key: &str) -> Result<Value, StorageError> {
        let path = self.base_dir.join(key);
        let bytes = tokio::fs::read(&path).await.map_err(|_| StorageError::NotFound {
            key: key.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    async fn latest_key(&self) -> Result<Option<String>, StorageError> {
        let mut entries = tokio::fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| StorageError::Io {
                message: e.to_string(),
            })?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::Io {
            message: e.to_string(),
        })? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".json") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names.pop())
    }
}

/// In-memory [`JsonStorage`] for tests.
#[derive(Default)]
pub struct InMemoryJsonStorage {
    entries: RwLock<FxHashMap<String, Value>>,
    order: RwLock<Vec<String>>,
}

impl InMemoryJsonStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JsonStorage for InMemoryJsonStorage {
    async fn save(&self, value: &Value, key: Option<String>) -> Result<String, StorageError> {
        let key = key.unwrap_or_else(generate_key);
        self.entries.write().await.insert(key.clone(), value.clone());
        self.order.write().await.push(key.clone());
        Ok(key)
    }

    async fn load(&self, key: &str) -> Result<Value, StorageError> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn latest_key(&self) -> Result<Option<String>, StorageError> {
        Ok(self.order.read().await.last().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn local_storage_round_trips_and_finds_latest() {
        let dir = tempdir().unwrap();
        let storage = LocalJsonStorage::new(dir.path()).unwrap();
        storage.save(&json!({"n": 1}), None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second_key = storage.save(&json!({"n": 2}), None).await.unwrap();

        let latest = storage.latest_key().await.unwrap().unwrap();
        assert_eq!(latest, second_key);
        let loaded = storage.load(&latest).await.unwrap();
        assert_eq!(loaded, json!({"n": 2}));
    }

    #[tokio::test]
    async fn load_missing_key_is_not_found() {
        let storage = InMemoryJsonStorage::new();
        let err = storage.load("missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }
}
