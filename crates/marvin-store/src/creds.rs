//! Service credential store: one JSON file of opaque per-service blobs
//! (currently only the moltbook account). Same atomic write-replace
//! pattern as the rules store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::error::Result;

pub struct CredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        };
        if let Some(parent) = store.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(store)
    }

    pub fn get(&self, service: &str) -> Option<Value> {
        let _guard = self.lock.lock().unwrap();
        let file = self.read_file().ok()?;
        file.get(service).cloned()
    }

    pub fn set(&self, service: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut file = self.read_file().unwrap_or_default();
        file.insert(service.to_string(), value);
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&file)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn read_file(&self) -> Result<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("creds.json")).unwrap();
        assert!(store.get("moltbook").is_none());

        store
            .set("moltbook", json!({"api_key": "mb-123", "handle": "marvin"}))
            .unwrap();
        let value = store.get("moltbook").unwrap();
        assert_eq!(value["handle"], "marvin");
    }
}
