//! Secrets key-value stores.
//!
//! [`SecretsKvStore`] is the contract shared by the unified (SQL-backed)
//! secrets store and the secrets plugin backend, so the migration can copy
//! between any two of them.
//!
//! [`UnifiedSecretsStore`] keeps secrets in a [`StorageBackend`], one record
//! per key at `secrets/{org_id}/{namespace}/{kind}`. Values are sealed with
//! the store's data key and the storage path as associated data. Decrypted
//! values are cached per key and reused until the record's `updated_at`
//! changes.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use keyshift_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::{self, DataKey};
use crate::error::SecretsStoreError;
use crate::item::{SecretItem, SecretKey};

/// Storage prefix for unified secret records.
pub const SECRETS_PREFIX: &str = "secrets/";

/// Selects a subset of keys. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    pub org_id: Option<i64>,
    pub namespace: Option<String>,
    pub kind: Option<String>,
}

impl KeyFilter {
    /// A filter matching every key.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn org(mut self, org_id: i64) -> Self {
        self.org_id = Some(org_id);
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn matches(&self, key: &SecretKey) -> bool {
        self.org_id.is_none_or(|o| o == key.org_id)
            && self.namespace.as_ref().is_none_or(|n| *n == key.namespace)
            && self.kind.as_ref().is_none_or(|k| *k == key.kind)
    }
}

/// A store of secrets keyed by `(org_id, namespace, kind)`.
#[async_trait::async_trait]
pub trait SecretsKvStore: Send + Sync {
    /// Fetch a secret value. `Ok(None)` when the key is absent.
    async fn get(&self, key: &SecretKey) -> Result<Option<String>, SecretsStoreError>;

    /// Create or overwrite a secret.
    async fn set(&self, key: &SecretKey, value: &str) -> Result<(), SecretsStoreError>;

    /// Remove a secret. Removing an absent key is not an error.
    async fn del(&self, key: &SecretKey) -> Result<(), SecretsStoreError>;

    /// List keys matching `filter`, in ascending key order.
    async fn keys(&self, filter: &KeyFilter) -> Result<Vec<SecretKey>, SecretsStoreError>;

    /// Move a secret to another namespace within the same org and kind.
    async fn rename(&self, key: &SecretKey, new_namespace: &str)
    -> Result<(), SecretsStoreError>;

    /// Every secret in the store, decrypted, in ascending key order.
    async fn get_all(&self) -> Result<Vec<SecretItem>, SecretsStoreError>;
}

#[derive(Serialize, Deserialize)]
struct StoredSecret {
    ciphertext: String,
    updated_at: DateTime<Utc>,
}

struct CachedValue {
    updated_at: DateTime<Utc>,
    value: Zeroizing<String>,
}

/// Encrypted secrets kept in a generic storage backend.
pub struct UnifiedSecretsStore {
    backend: Arc<dyn StorageBackend>,
    key: DataKey,
    cache: RwLock<HashMap<SecretKey, CachedValue>>,
}

impl std::fmt::Debug for UnifiedSecretsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedSecretsStore")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl UnifiedSecretsStore {
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, key: DataKey) -> Self {
        Self {
            backend,
            key,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Number of decrypted values currently cached.
    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn write_record(&self, key: &SecretKey, value: &str) -> Result<(), SecretsStoreError> {
        let path = key.to_path(SECRETS_PREFIX);
        let sealed = crypto::seal(&self.key, value.as_bytes(), path.as_bytes()).map_err(
            |source| SecretsStoreError::Crypto {
                key: key.clone(),
                source,
            },
        )?;
        let record = StoredSecret {
            ciphertext: BASE64.encode(sealed),
            updated_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| SecretsStoreError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.backend.put(&path, &bytes).await?;

        self.cache.write().await.insert(
            key.clone(),
            CachedValue {
                updated_at: record.updated_at,
                value: Zeroizing::new(value.to_owned()),
            },
        );
        Ok(())
    }

    /// Decode and decrypt a raw record, consulting the cache first.
    async fn open_record(&self, key: &SecretKey, raw: &[u8]) -> Result<String, SecretsStoreError> {
        let record: StoredSecret =
            serde_json::from_slice(raw).map_err(|e| SecretsStoreError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        let hit = self
            .cache
            .read()
            .await
            .get(key)
            .filter(|cached| cached.updated_at == record.updated_at)
            .map(|cached| String::clone(&cached.value));
        if let Some(value) = hit {
            return Ok(value);
        }

        let sealed = BASE64
            .decode(&record.ciphertext)
            .map_err(|e| SecretsStoreError::Corrupt {
                key: key.clone(),
                reason: format!("ciphertext is not base64: {e}"),
            })?;
        let path = key.to_path(SECRETS_PREFIX);
        let plain = Zeroizing::new(crypto::open(&self.key, &sealed, path.as_bytes()).map_err(
            |source| SecretsStoreError::Crypto {
                key: key.clone(),
                source,
            },
        )?);
        let value = String::from_utf8(plain.to_vec()).map_err(|_| SecretsStoreError::Corrupt {
            key: key.clone(),
            reason: "decrypted value is not UTF-8".to_owned(),
        })?;

        self.cache.write().await.insert(
            key.clone(),
            CachedValue {
                updated_at: record.updated_at,
                value: Zeroizing::new(value.clone()),
            },
        );
        Ok(value)
    }
}

#[async_trait::async_trait]
impl SecretsKvStore for UnifiedSecretsStore {
    async fn get(&self, key: &SecretKey) -> Result<Option<String>, SecretsStoreError> {
        match self.backend.get(&key.to_path(SECRETS_PREFIX)).await? {
            Some(raw) => self.open_record(key, &raw).await.map(Some),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &SecretKey, value: &str) -> Result<(), SecretsStoreError> {
        self.write_record(key, value).await?;
        debug!(secret = %key, "unified secret stored");
        Ok(())
    }

    async fn del(&self, key: &SecretKey) -> Result<(), SecretsStoreError> {
        self.backend.delete(&key.to_path(SECRETS_PREFIX)).await?;
        self.cache.write().await.remove(key);
        debug!(secret = %key, "unified secret deleted");
        Ok(())
    }

    async fn keys(&self, filter: &KeyFilter) -> Result<Vec<SecretKey>, SecretsStoreError> {
        let prefix = match filter.org_id {
            Some(org_id) => format!("{SECRETS_PREFIX}{org_id}/"),
            None => SECRETS_PREFIX.to_owned(),
        };
        let mut keys: Vec<SecretKey> = self
            .backend
            .list(&prefix)
            .await?
            .iter()
            .filter_map(|path| SecretKey::from_path(SECRETS_PREFIX, path))
            .filter(|key| filter.matches(key))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn rename(
        &self,
        key: &SecretKey,
        new_namespace: &str,
    ) -> Result<(), SecretsStoreError> {
        if key.namespace == new_namespace {
            return Ok(());
        }
        let value = Zeroizing::new(
            self.get(key)
                .await?
                .ok_or_else(|| SecretsStoreError::NotFound { key: key.clone() })?,
        );
        let renamed = SecretKey::new(key.org_id, new_namespace, key.kind.clone());
        self.write_record(&renamed, &value).await?;
        self.del(key).await?;
        debug!(from = %key, to = %renamed, "unified secret renamed");
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<SecretItem>, SecretsStoreError> {
        let entries = self.backend.scan(SECRETS_PREFIX).await?;
        let mut items = Vec::with_capacity(entries.len());
        for (path, raw) in entries {
            let Some(key) = SecretKey::from_path(SECRETS_PREFIX, &path) else {
                warn!(path = %path, "skipping unrecognised record under secrets prefix");
                continue;
            };
            let value = self.open_record(&key, &raw).await?;
            items.push(SecretItem { key, value });
        }
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use keyshift_storage::MemoryBackend;

    fn store_with_backend() -> (UnifiedSecretsStore, MemoryBackend) {
        let backend = MemoryBackend::new();
        let store = UnifiedSecretsStore::new(Arc::new(backend.clone()), DataKey::generate());
        (store, backend)
    }

    #[tokio::test]
    async fn set_then_get_returns_plaintext() {
        let (store, _) = store_with_backend();
        let key = SecretKey::new(1, "ds-a", "basic");
        store.set(&key, "secretA").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("secretA"));
    }

    #[tokio::test]
    async fn backend_never_sees_plaintext() {
        let (store, backend) = store_with_backend();
        let key = SecretKey::new(1, "ds-a", "basic");
        store.set(&key, "secretA").await.unwrap();

        let raw = backend
            .get(&key.to_path(SECRETS_PREFIX))
            .await
            .unwrap()
            .unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("secretA"));
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let (store, _) = store_with_backend();
        let key = SecretKey::new(1, "nope", "basic");
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn keys_filters_by_org_namespace_and_kind() {
        let (store, _) = store_with_backend();
        store.set(&SecretKey::new(1, "ds-a", "basic"), "a").await.unwrap();
        store.set(&SecretKey::new(1, "ds-a", "token"), "b").await.unwrap();
        store.set(&SecretKey::new(1, "ds-b", "basic"), "c").await.unwrap();
        store.set(&SecretKey::new(2, "ds-a", "basic"), "d").await.unwrap();

        let org1 = store.keys(&KeyFilter::all().org(1)).await.unwrap();
        assert_eq!(org1.len(), 3);

        let basic_ds_a = store
            .keys(&KeyFilter::all().namespace("ds-a").kind("basic"))
            .await
            .unwrap();
        assert_eq!(
            basic_ds_a,
            vec![SecretKey::new(1, "ds-a", "basic"), SecretKey::new(2, "ds-a", "basic")]
        );
    }

    #[tokio::test]
    async fn del_removes_record_and_cache_entry() {
        let (store, backend) = store_with_backend();
        let key = SecretKey::new(1, "ds-a", "basic");
        store.set(&key, "secretA").await.unwrap();
        assert_eq!(store.cached_len().await, 1);

        store.del(&key).await.unwrap();
        assert!(backend.is_empty().await);
        assert_eq!(store.cached_len().await, 0);
        store.del(&key).await.unwrap();
    }

    #[tokio::test]
    async fn rename_moves_value_to_new_namespace() {
        let (store, _) = store_with_backend();
        let old = SecretKey::new(1, "ds-a", "basic");
        store.set(&old, "secretA").await.unwrap();

        store.rename(&old, "ds-renamed").await.unwrap();

        assert_eq!(store.get(&old).await.unwrap(), None);
        let moved = SecretKey::new(1, "ds-renamed", "basic");
        assert_eq!(store.get(&moved).await.unwrap().as_deref(), Some("secretA"));
    }

    #[tokio::test]
    async fn rename_missing_secret_fails() {
        let (store, _) = store_with_backend();
        let result = store.rename(&SecretKey::new(1, "ghost", "basic"), "x").await;
        assert!(matches!(result, Err(SecretsStoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn record_moved_by_hand_fails_authentication() {
        let (store, backend) = store_with_backend();
        let a = SecretKey::new(1, "ds-a", "basic");
        let b = SecretKey::new(1, "ds-b", "basic");
        store.set(&a, "secretA").await.unwrap();

        let raw = backend.get(&a.to_path(SECRETS_PREFIX)).await.unwrap().unwrap();
        backend.put(&b.to_path(SECRETS_PREFIX), &raw).await.unwrap();

        let result = store.get(&b).await;
        assert!(matches!(result, Err(SecretsStoreError::Crypto { .. })));
    }

    #[tokio::test]
    async fn get_all_decrypts_in_key_order_and_skips_foreign_paths() {
        let (store, backend) = store_with_backend();
        store.set(&SecretKey::new(1, "ds-b", "basic"), "secretB").await.unwrap();
        store.set(&SecretKey::new(1, "ds-a", "basic"), "secretA").await.unwrap();
        backend.put("secrets/garbage", b"{}").await.unwrap();

        let items = store.get_all().await.unwrap();
        let values: Vec<&str> = items.iter().map(|i| i.value.as_str()).collect();
        assert_eq!(values, vec!["secretA", "secretB"]);
    }

    #[tokio::test]
    async fn fresh_store_over_same_backend_decrypts_without_cache() {
        let backend = MemoryBackend::new();
        let key = DataKey::generate();
        let writer = UnifiedSecretsStore::new(Arc::new(backend.clone()), key.clone());
        let secret = SecretKey::new(1, "ds-a", "basic");
        writer.set(&secret, "secretA").await.unwrap();

        let reader = UnifiedSecretsStore::new(Arc::new(backend), key);
        assert_eq!(reader.cached_len().await, 0);
        assert_eq!(reader.get(&secret).await.unwrap().as_deref(), Some("secretA"));
        assert_eq!(reader.cached_len().await, 1);
    }

    #[tokio::test]
    async fn corrupt_record_is_reported() {
        let (store, backend) = store_with_backend();
        let key = SecretKey::new(1, "ds-a", "basic");
        backend
            .put(&key.to_path(SECRETS_PREFIX), b"not json")
            .await
            .unwrap();
        assert!(matches!(
            store.get(&key).await,
            Err(SecretsStoreError::Corrupt { .. })
        ));
    }
}
