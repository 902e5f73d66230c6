//! In-memory storage backend.
//!
//! Data lives in a `BTreeMap` behind a Tokio `RwLock` and is lost when the
//! process exits. Clones share the same map, so a test can hand one clone to
//! a store and inspect the other.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{StorageBackend, StorageError};

/// An in-memory storage backend backed by a `BTreeMap`.
///
/// # Examples
///
/// ```
/// # use keyshift_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put("secrets/1/ds-a/basic", b"data").await.unwrap();
/// let val = backend.get("secrets/1/ds-a/basic").await.unwrap();
/// assert_eq!(val, Some(b"data".to_vec()));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the backend holds no keys at all.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.data
            .write()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        Ok(data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.read().await.contains_key(key))
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let data = self.data.read().await;
        Ok(data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("secrets/1/ds-a/basic").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites_existing_value() {
        let backend = MemoryBackend::new();
        backend.put("kv/-1/secretsmanager/flag", b"true").await.unwrap();
        backend.put("kv/-1/secretsmanager/flag", b"false").await.unwrap();
        let val = backend.get("kv/-1/secretsmanager/flag").await.unwrap();
        assert_eq!(val, Some(b"false".to_vec()));
    }

    #[tokio::test]
    async fn delete_missing_key_is_noop() {
        let backend = MemoryBackend::new();
        backend.delete("secrets/9/nope/basic").await.unwrap();
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn list_is_prefix_scoped_and_sorted() {
        let backend = MemoryBackend::new();
        backend.put("secrets/1/ds-b/basic", b"2").await.unwrap();
        backend.put("secrets/1/ds-a/basic", b"1").await.unwrap();
        backend.put("secrets/2/ds-a/basic", b"3").await.unwrap();
        backend.put("kv/-1/secretsmanager/flag", b"true").await.unwrap();

        let keys = backend.list("secrets/1/").await.unwrap();
        assert_eq!(keys, vec!["secrets/1/ds-a/basic", "secrets/1/ds-b/basic"]);
    }

    #[tokio::test]
    async fn scan_returns_values_alongside_keys() {
        let backend = MemoryBackend::new();
        backend.put("secrets/1/ds-a/basic", b"a").await.unwrap();
        backend.put("secrets/1/ds-b/basic", b"b").await.unwrap();
        backend.put("other/x", b"x").await.unwrap();

        let entries = backend.scan("secrets/").await.unwrap();
        assert_eq!(
            entries,
            vec![
                ("secrets/1/ds-a/basic".to_owned(), b"a".to_vec()),
                ("secrets/1/ds-b/basic".to_owned(), b"b".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn clones_share_state() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        backend.put("secrets/1/ds-a/basic", b"v").await.unwrap();
        assert!(clone.exists("secrets/1/ds-a/basic").await.unwrap());
        assert_eq!(clone.len().await, 1);
    }
}
