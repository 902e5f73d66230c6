//! API key records.
//!
//! Keys are stored as JSON records at `apikeys/id/{id}` with two unique
//! indexes: `(org_id, name)` and the hashed key. Callers pass the key already
//! hashed; the store never sees the raw token.
//!
//! Writes are serialized through a mutex so id allocation and the uniqueness
//! checks stay consistent within one process.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use keyshift_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ApiKeyError;

const ID_PREFIX: &str = "apikeys/id/";
const NAME_PREFIX: &str = "apikeys/name/";
const HASH_PREFIX: &str = "apikeys/hash/";
const NEXT_ID_KEY: &str = "apikeys/next_id";

/// Source of the current time, replaceable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A stored API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: i64,
    pub org_id: i64,
    pub name: String,
    /// Hashed key material.
    pub key: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Expiry as unix seconds; `None` never expires.
    pub expires: Option<i64>,
}

impl ApiKey {
    /// Whether the key has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|e| e < now.timestamp())
    }
}

/// Request to create an API key.
#[derive(Debug, Clone)]
pub struct AddApiKey {
    pub org_id: i64,
    pub name: String,
    /// Hashed key material.
    pub key: String,
    /// Lifetime in seconds; `0` means the key never expires.
    pub seconds_to_live: i64,
}

/// Which key ids a caller may read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyScope {
    All,
    Ids(BTreeSet<i64>),
}

impl KeyScope {
    fn allows(&self, id: i64) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.contains(&id),
        }
    }
}

/// API key store over a storage backend.
pub struct ApiKeyStore {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for ApiKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyStore").finish_non_exhaustive()
    }
}

fn id_path(id: i64) -> String {
    format!("{ID_PREFIX}{id:020}")
}

fn name_path(org_id: i64, name: &str) -> String {
    format!("{NAME_PREFIX}{org_id}/{}", urlencoding::encode(name))
}

fn hash_path(key: &str) -> String {
    format!("{HASH_PREFIX}{}", urlencoding::encode(key))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiKeyError> {
    serde_json::from_slice(bytes).map_err(|e| ApiKeyError::Corrupt {
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ApiKeyError> {
    serde_json::to_vec(value).map_err(|e| ApiKeyError::Corrupt {
        reason: e.to_string(),
    })
}

impl ApiKeyStore {
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a key and return the stored record.
    ///
    /// # Errors
    ///
    /// - [`ApiKeyError::InvalidExpiration`] for a negative lifetime.
    /// - [`ApiKeyError::Duplicate`] if the org already has a key with this
    ///   name, or the hashed key is already in use.
    pub async fn add(&self, cmd: AddApiKey) -> Result<ApiKey, ApiKeyError> {
        if cmd.seconds_to_live < 0 {
            return Err(ApiKeyError::InvalidExpiration);
        }
        let _guard = self.write_lock.lock().await;

        let name_idx = name_path(cmd.org_id, &cmd.name);
        let hash_idx = hash_path(&cmd.key);
        if self.backend.exists(&name_idx).await? || self.backend.exists(&hash_idx).await? {
            return Err(ApiKeyError::Duplicate);
        }

        let now = self.clock.now();
        let expires = if cmd.seconds_to_live > 0 {
            let expiry = Duration::try_seconds(cmd.seconds_to_live)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .ok_or(ApiKeyError::InvalidExpiration)?;
            Some(expiry.timestamp())
        } else {
            None
        };
        let id = self.allocate_id().await?;
        let record = ApiKey {
            id,
            org_id: cmd.org_id,
            name: cmd.name,
            key: cmd.key,
            created: now,
            updated: now,
            last_used_at: None,
            expires,
        };

        let id_bytes = id.to_string();
        self.backend.put(&id_path(id), &encode(&record)?).await?;
        self.backend.put(&name_idx, id_bytes.as_bytes()).await?;
        self.backend.put(&hash_idx, id_bytes.as_bytes()).await?;
        debug!(org_id = record.org_id, id, "api key added");
        Ok(record)
    }

    /// # Errors
    ///
    /// Returns [`ApiKeyError::InvalidKey`] if no such key exists.
    pub async fn get_by_name(&self, org_id: i64, name: &str) -> Result<ApiKey, ApiKeyError> {
        self.get_by_index(&name_path(org_id, name)).await
    }

    /// # Errors
    ///
    /// Returns [`ApiKeyError::InvalidKey`] if no key has this hash.
    pub async fn get_by_hash(&self, key: &str) -> Result<ApiKey, ApiKeyError> {
        self.get_by_index(&hash_path(key)).await
    }

    /// Keys of one org visible within `scope`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`ApiKeyError::Storage`] or [`ApiKeyError::Corrupt`] if a
    /// record cannot be loaded.
    pub async fn list(
        &self,
        org_id: i64,
        include_expired: bool,
        scope: &KeyScope,
    ) -> Result<Vec<ApiKey>, ApiKeyError> {
        let now = self.clock.now();
        let mut keys = Vec::new();
        for (_, bytes) in self.backend.scan(ID_PREFIX).await? {
            let key: ApiKey = decode(&bytes)?;
            if key.org_id == org_id
                && scope.allows(key.id)
                && (include_expired || !key.is_expired(now))
            {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// # Errors
    ///
    /// Returns [`ApiKeyError::NotFound`] if the org has no key with this id.
    pub async fn delete(&self, org_id: i64, id: i64) -> Result<(), ApiKeyError> {
        let _guard = self.write_lock.lock().await;
        let key = match self.load(id).await? {
            Some(key) if key.org_id == org_id => key,
            _ => return Err(ApiKeyError::NotFound),
        };
        self.backend.delete(&name_path(key.org_id, &key.name)).await?;
        self.backend.delete(&hash_path(&key.key)).await?;
        self.backend.delete(&id_path(id)).await?;
        debug!(org_id, id, "api key deleted");
        Ok(())
    }

    /// Stamp `last_used_at` with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`ApiKeyError::NotFound`] if the key does not exist.
    pub async fn update_last_used(&self, id: i64) -> Result<(), ApiKeyError> {
        let _guard = self.write_lock.lock().await;
        let mut key = self.load(id).await?.ok_or(ApiKeyError::NotFound)?;
        let now = self.clock.now();
        key.last_used_at = Some(now);
        key.updated = now;
        self.backend.put(&id_path(id), &encode(&key)?).await?;
        Ok(())
    }

    async fn load(&self, id: i64) -> Result<Option<ApiKey>, ApiKeyError> {
        match self.backend.get(&id_path(id)).await? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn get_by_index(&self, index: &str) -> Result<ApiKey, ApiKeyError> {
        let raw = self
            .backend
            .get(index)
            .await?
            .ok_or(ApiKeyError::InvalidKey)?;
        let id: i64 = decode(&raw)?;
        self.load(id).await?.ok_or(ApiKeyError::InvalidKey)
    }

    async fn allocate_id(&self) -> Result<i64, ApiKeyError> {
        let last: i64 = match self.backend.get(NEXT_ID_KEY).await? {
            Some(bytes) => decode(&bytes)?,
            None => 0,
        };
        let id = last.saturating_add(1);
        self.backend.put(NEXT_ID_KEY, id.to_string().as_bytes()).await?;
        Ok(id)
    }
}
