//! Keyed storage backends.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{QueryWatchError, Result};

/// Namespaced string key/value storage.
///
/// Writes are atomic per key; nothing else is guaranteed across keys.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

    /// Returns whether the key existed.
    fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// All keys of a namespace, sorted.
    fn keys(&self, namespace: &str) -> Result<Vec<String>>;

    fn clear(&self, namespace: &str) -> Result<()>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .namespaces
            .read()
            .get(namespace)
            .and_then(|entries| entries.get(key).cloned()))
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self
            .namespaces
            .write()
            .get_mut(namespace)
            .map(|entries| entries.remove(key).is_some())
            .unwrap_or(false))
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self
            .namespaces
            .read()
            .get(namespace)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        self.namespaces.write().remove(namespace);
        Ok(())
    }
}

/// One JSON file per key under `{root}/{namespace}/{key}.json`.
///
/// Values are written to a temporary file and renamed into place, so a
/// reader never observes a half-written record.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf> {
        validate_segment(namespace)?;
        Ok(self.root.join(namespace))
    }

    fn key_path(&self, namespace: &str, key: &str) -> Result<PathBuf> {
        validate_segment(key)?;
        Ok(self.namespace_dir(namespace)?.join(format!("{}.json", key)))
    }
}

/// Keys and namespaces become path segments; keep them to a safe alphabet.
fn validate_segment(segment: &str) -> Result<()> {
    let valid = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(QueryWatchError::invalid_argument(format!(
            "Invalid store key or namespace: {:?}",
            segment
        )))
    }
}

impl KeyValueStore for DirectoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let path = self.key_path(namespace, key)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path)?))
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let dir = self.namespace_dir(namespace)?;
        fs::create_dir_all(&dir)?;
        let path = self.key_path(namespace, key)?;
        let tmp = dir.join(format!(".{}.tmp", key));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let path = self.key_path(namespace, key)?;
        if path.exists() {
            fs::remove_file(&path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let dir = self.namespace_dir(namespace)?;
        let mut keys = Vec::new();
        if !dir.exists() {
            return Ok(keys);
        }

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        let dir = self.namespace_dir(namespace)?;
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get("ns", "a").unwrap(), None);
        store.put("ns", "b", "2").unwrap();
        store.put("ns", "a", "1").unwrap();
        store.put("other", "a", "x").unwrap();
        assert_eq!(store.get("ns", "a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.keys("ns").unwrap(), vec!["a", "b"]);

        store.put("ns", "a", "updated").unwrap();
        assert_eq!(store.get("ns", "a").unwrap().as_deref(), Some("updated"));

        assert!(store.delete("ns", "a").unwrap());
        assert!(!store.delete("ns", "a").unwrap());

        store.clear("ns").unwrap();
        assert!(store.keys("ns").unwrap().is_empty());
        assert_eq!(store.get("other", "a").unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_directory_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path().join("captures")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_directory_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        DirectoryStore::new(dir.path())
            .unwrap()
            .put("ns", "k", "{\"v\":1}")
            .unwrap();
        let reopened = DirectoryStore::new(dir.path()).unwrap();
        assert_eq!(reopened.get("ns", "k").unwrap().as_deref(), Some("{\"v\":1}"));
        assert_eq!(reopened.keys("ns").unwrap(), vec!["k"]);
    }

    #[test]
    fn test_directory_store_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.put("ns", "../escape", "x"),
            Err(QueryWatchError::InvalidArgument { .. })
        ));
        assert!(store.get("../ns", "k").is_err());
    }
}
