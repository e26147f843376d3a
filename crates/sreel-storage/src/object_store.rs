//! The durable remote store, seen as a key-value blob store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{StorageError, StorageResult};

/// Information about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
}

/// Minimal interface the pipeline needs from the remote archive:
/// folder-per-project keys with list/get/put semantics.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under a key, overwriting any existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Fetch an object. `StorageError::NotFound` when the key is absent.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// List all objects under a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;
}

/// In-memory store backing unit and scenario tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, for test setup.
    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.objects
            .lock()
            .expect("memory store lock")
            .insert(key.into(), bytes);
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().expect("memory store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all keys, for assertions.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .expect("memory store lock")
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> StorageResult<()> {
        self.objects
            .lock()
            .expect("memory store lock")
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .lock()
            .expect("memory store lock")
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        Ok(self
            .objects
            .lock()
            .expect("memory store lock")
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectInfo {
                key: k.clone(),
                size: v.len() as u64,
            })
            .collect())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self
            .objects
            .lock()
            .expect("memory store lock")
            .contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        store
            .put("projects/demo/a.txt", b"hello".to_vec(), "text/plain")
            .await
            .expect("put");

        assert!(store.exists("projects/demo/a.txt").await.expect("exists"));
        assert_eq!(store.get("projects/demo/a.txt").await.expect("get"), b"hello");

        let err = store.get("projects/demo/missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_memory_store_list_by_prefix() {
        let store = MemoryStore::new();
        store.insert("projects/demo/images/001.png", vec![1]);
        store.insert("projects/demo/images/002.png", vec![2, 2]);
        store.insert("projects/other/images/001.png", vec![3]);

        let listed = store.list("projects/demo/images/").await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, "projects/demo/images/001.png");
        assert_eq!(listed[1].size, 2);
    }
}
