//! Plain string key-value storage scoped by organization and namespace.
//!
//! Records live at `kv/{org_id}/{namespace}/{key}`. Use
//! [`ALL_ORGANIZATIONS`] for settings that are not owned by any tenant.

use std::sync::Arc;

use keyshift_storage::{StorageBackend, StorageError};

/// Organization id for process-wide (non-tenant) entries.
pub const ALL_ORGANIZATIONS: i64 = -1;

const KV_PREFIX: &str = "kv/";

/// A view of a storage backend restricted to one `(org_id, namespace)`.
#[derive(Clone)]
pub struct NamespacedKvStore {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
}

impl std::fmt::Debug for NamespacedKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespacedKvStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl NamespacedKvStore {
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, org_id: i64, namespace: &str) -> Self {
        Self {
            backend,
            prefix: format!("{KV_PREFIX}{org_id}/{}/", urlencoding::encode(namespace)),
        }
    }

    fn path(&self, key: &str) -> String {
        format!("{}{}", self.prefix, urlencoding::encode(key))
    }

    /// Read a value; `Ok(None)` if unset.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] on backend failure or when the stored
    /// bytes are not UTF-8.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path(key);
        match self.backend.get(&path).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StorageError::Read {
                    key: path,
                    reason: format!("value is not UTF-8: {e}"),
                }),
            None => Ok(None),
        }
    }

    /// # Errors
    ///
    /// Returns [`StorageError::Write`] on backend failure.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.backend.put(&self.path(key), value.as_bytes()).await
    }

    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] on backend failure.
    pub async fn del(&self, key: &str) -> Result<(), StorageError> {
        self.backend.delete(&self.path(key)).await
    }

    /// All keys set in this namespace, decoded.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] on backend failure.
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .backend
            .list(&self.prefix)
            .await?
            .iter()
            .filter_map(|path| path.strip_prefix(&self.prefix))
            .filter_map(|raw| urlencoding::decode(raw).ok().map(|k| k.into_owned()))
            .collect())
    }
}
