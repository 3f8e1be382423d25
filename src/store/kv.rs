use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::error::GuardError;

/// Generic option storage: get, set, delete by key.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, GuardError>;
    fn set(&self, key: &str, value: Value) -> Result<(), GuardError>;
    fn delete(&self, key: &str) -> Result<(), GuardError>;
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, GuardError>;
}

/// A JSON object on disk, rewritten after every mutation. A mutation only
/// becomes visible once the file write succeeded.
pub struct JsonFileStore {
    file_path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(JsonFileStore {
            file_path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    fn save(&self, entries: &BTreeMap<String, Value>) -> Result<(), GuardError> {
        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.file_path, content)
            .map_err(|e| GuardError::filesystem(&self.file_path, e))
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Value>) -> T,
    ) -> Result<T, GuardError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| GuardError::Store("store lock poisoned".to_string()))?;
        Ok(f(&mut entries))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, GuardError> {
        self.with_entries(|entries| entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), GuardError> {
        self.with_entries(|entries| {
            let mut next = entries.clone();
            next.insert(key.to_string(), value);
            self.save(&next).map(|()| *entries = next)
        })?
    }

    fn delete(&self, key: &str) -> Result<(), GuardError> {
        self.with_entries(|entries| {
            if !entries.contains_key(key) {
                return Ok(());
            }
            let mut next = entries.clone();
            next.remove(key);
            self.save(&next).map(|()| *entries = next)
        })?
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, GuardError> {
        self.with_entries(|entries| {
            entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_load_or_create_new() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::load_or_create(&dir.path().join("kv.json")).unwrap();
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_set_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::load_or_create(&dir.path().join("kv.json")).unwrap();
        store.set("a", json!(1)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!(1)));
        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        store.delete("a").unwrap();
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.json");
        {
            let store = JsonFileStore::load_or_create(&path).unwrap();
            store.set("settings.allowed_attempts", json!(5)).unwrap();
            store.set("whitelist", json!(["1.2.3.4"])).unwrap();
        }
        let store = JsonFileStore::load_or_create(&path).unwrap();
        assert_eq!(store.get("settings.allowed_attempts").unwrap(), Some(json!(5)));
        assert_eq!(store.get("whitelist").unwrap(), Some(json!(["1.2.3.4"])));
    }

    #[test]
    fn test_keys_with_prefix() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::load_or_create(&dir.path().join("kv.json")).unwrap();
        store.set("attempts.1.1.1.1", json!({})).unwrap();
        store.set("attempts.2.2.2.2", json!({})).unwrap();
        store.set("whitelist", json!([])).unwrap();
        assert_eq!(
            store.keys_with_prefix("attempts.").unwrap(),
            vec!["attempts.1.1.1.1".to_string(), "attempts.2.2.2.2".to_string()]
        );
    }

    #[test]
    fn test_unwritable_path_is_filesystem_error() {
        let dir = TempDir::new().unwrap();
        let store =
            JsonFileStore::load_or_create(&dir.path().join("missing-dir").join("kv.json")).unwrap();
        assert!(matches!(
            store.set("a", json!(1)),
            Err(GuardError::Filesystem { .. })
        ));
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_failed_save_keeps_previous_values() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir(&data_dir).unwrap();
        let store = JsonFileStore::load_or_create(&data_dir.join("kv.json")).unwrap();
        store.set("a", json!(1)).unwrap();
        store.set("b", json!(2)).unwrap();

        std::fs::remove_dir_all(&data_dir).unwrap();
        assert!(store.set("a", json!(99)).is_err());
        assert!(store.delete("b").is_err());

        assert_eq!(store.get("a").unwrap(), Some(json!(1)));
        assert_eq!(store.get("b").unwrap(), Some(json!(2)));
    }
}
