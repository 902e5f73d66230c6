//! Persisted startup policy for the secrets plugin.
//!
//! One boolean decides whether a secrets plugin that fails to start should
//! abort process startup. It lives under a reserved, tenant-free namespace
//! and is only reachable through [`StartupPolicy`].

use std::sync::Arc;

use keyshift_storage::StorageBackend;

use crate::error::PolicyError;
use crate::namespaced::{ALL_ORGANIZATIONS, NamespacedKvStore};

/// Namespace reserved for secrets manager settings.
pub const POLICY_NAMESPACE: &str = "secretsmanager";

/// Key of the fatal-on-startup flag inside [`POLICY_NAMESPACE`].
pub const FATAL_FLAG_KEY: &str = "fatal_plugin_error_on_startup";

/// Read/write access to the fatal-on-startup flag.
#[async_trait::async_trait]
pub trait StartupPolicy: Send + Sync {
    /// Whether a plugin startup failure should abort the process. An unset
    /// flag reads as `false`.
    async fn is_fatal(&self) -> Result<bool, PolicyError>;

    /// Persist the flag.
    async fn set_fatal(&self, fatal: bool) -> Result<(), PolicyError>;
}

/// [`StartupPolicy`] stored as `"true"`/`"false"` in a namespaced kv store.
#[derive(Debug, Clone)]
pub struct KvStartupPolicy {
    kv: NamespacedKvStore,
}

impl KvStartupPolicy {
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            kv: NamespacedKvStore::new(backend, ALL_ORGANIZATIONS, POLICY_NAMESPACE),
        }
    }
}

#[async_trait::async_trait]
impl StartupPolicy for KvStartupPolicy {
    async fn is_fatal(&self) -> Result<bool, PolicyError> {
        match self.kv.get(FATAL_FLAG_KEY).await? {
            None => Ok(false),
            Some(value) => value
                .parse()
                .map_err(|_| PolicyError::InvalidValue { value }),
        }
    }

    async fn set_fatal(&self, fatal: bool) -> Result<(), PolicyError> {
        self.kv.set(FATAL_FLAG_KEY, &fatal.to_string()).await?;
        Ok(())
    }
}
