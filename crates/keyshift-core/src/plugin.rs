//! Secrets store fronting the secrets manager plugin backend.
//!
//! Once the plugin holds any secret, losing it at startup would lose data, so
//! the first successful write marks plugin startup failures as fatal. The
//! migration may revert that mark if it cannot clean up the unified store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error};

use crate::error::SecretsStoreError;
use crate::item::{SecretItem, SecretKey};
use crate::kvstore::{KeyFilter, SecretsKvStore};
use crate::startup::StartupPolicy;

/// [`SecretsKvStore`] that delegates to a plugin backend and raises the
/// startup policy after the first successful write.
pub struct PluginSecretsStore {
    plugin_id: String,
    backend: Arc<dyn SecretsKvStore>,
    policy: Arc<dyn StartupPolicy>,
    fatal_marked: AtomicBool,
}

impl std::fmt::Debug for PluginSecretsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSecretsStore")
            .field("plugin_id", &self.plugin_id)
            .field("fatal_marked", &self.fatal_marked.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PluginSecretsStore {
    #[must_use]
    pub fn new(
        plugin_id: impl Into<String>,
        backend: Arc<dyn SecretsKvStore>,
        policy: Arc<dyn StartupPolicy>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            backend,
            policy,
            fatal_marked: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    async fn mark_startup_fatal(&self) {
        if self.fatal_marked.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.policy.set_fatal(true).await {
            Ok(()) => debug!(plugin = %self.plugin_id, "secrets plugin startup failures are now fatal"),
            Err(e) => {
                // Retried on the next successful write.
                self.fatal_marked.store(false, Ordering::Release);
                error!(
                    plugin = %self.plugin_id,
                    error = %e,
                    "failed to mark secrets plugin startup failures as fatal"
                );
            }
        }
    }
}

#[async_trait::async_trait]
impl SecretsKvStore for PluginSecretsStore {
    async fn get(&self, key: &SecretKey) -> Result<Option<String>, SecretsStoreError> {
        self.backend.get(key).await
    }

    async fn set(&self, key: &SecretKey, value: &str) -> Result<(), SecretsStoreError> {
        self.backend.set(key, value).await?;
        self.mark_startup_fatal().await;
        Ok(())
    }

    async fn del(&self, key: &SecretKey) -> Result<(), SecretsStoreError> {
        self.backend.del(key).await
    }

    async fn keys(&self, filter: &KeyFilter) -> Result<Vec<SecretKey>, SecretsStoreError> {
        self.backend.keys(filter).await
    }

    async fn rename(
        &self,
        key: &SecretKey,
        new_namespace: &str,
    ) -> Result<(), SecretsStoreError> {
        self.backend.rename(key, new_namespace).await
    }

    async fn get_all(&self) -> Result<Vec<SecretItem>, SecretsStoreError> {
        self.backend.get_all().await
    }
}
