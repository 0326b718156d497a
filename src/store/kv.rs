//! Flat string key-value persistence

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Where the data lives, unique per open store
    fn location(&self) -> String;
}

/// JSON object on disk, rewritten on every `set`
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self
            .data
            .read()
            .map_err(|_| Error::Store("store lock poisoned".to_string()))?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self
            .data
            .write()
            .map_err(|_| Error::Store("store lock poisoned".to_string()))?;
        data.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&*data)?)?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

static NEXT_MEMORY_STORE: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
pub struct MemoryStore {
    id: usize,
    data: RwLock<BTreeMap<String, String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            id: NEXT_MEMORY_STORE.fetch_add(1, Ordering::Relaxed),
            data: RwLock::default(),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self
            .data
            .read()
            .map_err(|_| Error::Store("store lock poisoned".to_string()))?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.data
            .write()
            .map_err(|_| Error::Store("store lock poisoned".to_string()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn location(&self) -> String {
        format!("memory#{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agent.json");

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("owner").unwrap(), None);
        store.set("owner", "f01234").unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("owner").unwrap().as_deref(), Some("f01234"));
    }

    #[test]
    fn test_last_write_wins() {
        let store = MemoryStore::new();
        store.set("operator", "a").unwrap();
        store.set("operator", "b").unwrap();
        assert_eq!(store.get("operator").unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_locations_are_distinct() {
        assert_ne!(MemoryStore::new().location(), MemoryStore::new().location());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.location(), path.display().to_string());
    }
}
