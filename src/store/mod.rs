//! Injected key-value repository
//!
//! The host application owns its household collections (contacts, tasks,
//! shopping lists, …). The voice core only needs a narrow `get`/`set`
//! contract per collection name; [`JsonFileStore`] is the default
//! file-backed implementation under the data directory.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::{Error, Result};

/// Read/write access to named JSON collections
pub trait KeyValueStore: Send + Sync {
    /// Fetch a collection by name
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be read
    fn get(&self, collection: &str) -> Result<Option<serde_json::Value>>;

    /// Replace a collection by name
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be written
    fn set(&self, collection: &str, value: &serde_json::Value) -> Result<()>;
}

/// Collections persisted as a single JSON object file
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store backed by `<data_dir>/collections.json`
    #[must_use]
    pub fn new(data_dir: &std::path::Path) -> Self {
        Self {
            path: data_dir.join("collections.json"),
            lock: Mutex::new(()),
        }
    }

    /// Read the whole collection object, defaulting to empty
    fn read_all(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        if !self.path.exists() {
            return Ok(serde_json::Map::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Store(format!("read {}: {e}", self.path.display())))?;
        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => {
                tracing::warn!(path = %self.path.display(), "store file is not an object, resetting");
                Ok(serde_json::Map::new())
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "store file is corrupt, resetting"
                );
                Ok(serde_json::Map::new())
            }
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, collection: &str) -> Result<Option<serde_json::Value>> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.read_all()?.remove(collection))
    }

    fn set(&self, collection: &str, value: &serde_json::Value) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut all = self.read_all()?;
        all.insert(collection.to_string(), value.clone());
        let content = serde_json::to_string_pretty(&serde_json::Value::Object(all))?;
        std::fs::write(&self.path, content)
            .map_err(|e| Error::Store(format!("write {}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_collection_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.get("familyContacts").unwrap().is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let value = serde_json::json!([{"name": "Cris"}]);
        store.set("familyContacts", &value).unwrap();
        assert_eq!(store.get("familyContacts").unwrap(), Some(value));
    }

    #[test]
    fn corrupt_file_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("collections.json"), "{nope").unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.get("anything").unwrap().is_none());
    }
}
