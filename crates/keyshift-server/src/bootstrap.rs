//! Startup sequencing: open the stores, migrate unified secrets into the
//! secrets plugin, and decide which store serves secrets afterwards.
//!
//! The persisted startup policy decides what a plugin failure means. While
//! the flag is unset or `false` the process keeps running on the unified
//! store; once the plugin holds secrets the flag is `true` and any plugin
//! failure aborts startup.

use std::sync::Arc;

use anyhow::Context;
use keyshift_core::crypto::DataKey;
use keyshift_core::error::MigrationError;
use keyshift_core::gate::{MigrationGate, PluginGate};
use keyshift_core::kvstore::{SecretsKvStore, UnifiedSecretsStore};
use keyshift_core::migration::{MigrationOutcome, MigrationRunner};
use keyshift_core::plugin::PluginSecretsStore;
use keyshift_core::startup::{KvStartupPolicy, StartupPolicy};
use keyshift_storage::{MemoryBackend, StorageBackend};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{MigratorConfig, StorageBackendType};

/// The store that serves secrets once startup finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveStore {
    Unified,
    Plugin { plugin_id: String },
}

/// Result of a successful startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub active: ActiveStore,
    /// `None` when the migration never ran because the plugin was unavailable.
    pub outcome: Option<MigrationOutcome>,
}

/// Opened storage for the three stores. The plugin backend is kept as a
/// `Result` since its failure is subject to the startup policy.
pub struct Backends {
    pub unified: Arc<dyn StorageBackend>,
    pub plugin: anyhow::Result<Arc<dyn StorageBackend>>,
    pub policy: Arc<dyn StorageBackend>,
}

/// Open one storage backend.
///
/// # Errors
///
/// Returns an error if the backend cannot be opened or its feature is not
/// compiled in.
pub async fn open_backend(
    storage: &StorageBackendType,
    store: &str,
) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match storage {
        StorageBackendType::Memory => {
            info!(store, "using in-memory storage (data will not persist)");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "postgres-backend")]
        StorageBackendType::Postgres { url, table } => {
            info!(store, url = %"[redacted]", table = %table, "using PostgreSQL storage");
            let backend = keyshift_storage::PostgresBackend::connect(url, table)
                .await
                .with_context(|| format!("failed to connect {store} storage to PostgreSQL"))?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "postgres-backend"))]
        StorageBackendType::Postgres { .. } => {
            anyhow::bail!("PostgreSQL backend requested but feature 'postgres-backend' is not enabled");
        }
    }
}

/// Open all backends named by `config`. Only a plugin backend failure is
/// deferred to [`start`].
///
/// # Errors
///
/// Returns an error if the unified or policy backend cannot be opened, or
/// if `cancel` fires first.
pub async fn open_backends(
    config: &MigratorConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<Backends> {
    let open = async {
        let policy = open_backend(&config.policy_storage, "policy").await?;
        let unified = open_backend(&config.unified_storage, "unified").await?;
        let plugin = open_backend(&config.plugin_storage, "plugin").await;
        Ok::<_, anyhow::Error>(Backends {
            unified,
            plugin,
            policy,
        })
    };
    tokio::select! {
        biased;
        () = cancel.cancelled() => anyhow::bail!("startup cancelled while opening storage"),
        opened = open => opened,
    }
}

/// Resolve a data key. In-memory stores fall back to a throwaway key.
///
/// # Errors
///
/// Returns an error if the key is malformed, or missing for persistent
/// storage.
pub fn data_key(
    encoded: Option<&str>,
    storage: &StorageBackendType,
    store: &str,
) -> anyhow::Result<DataKey> {
    match (encoded, storage) {
        (Some(hex), _) => {
            DataKey::from_hex(hex).with_context(|| format!("invalid data key for {store} store"))
        }
        (None, StorageBackendType::Memory) => {
            let key = DataKey::generate();
            warn!(store, fingerprint = %key.fingerprint(), "no data key configured, generated an ephemeral one");
            Ok(key)
        }
        (None, StorageBackendType::Postgres { .. }) => {
            anyhow::bail!("a data key is required for persistent {store} storage")
        }
    }
}

/// Run the startup sequence.
///
/// # Errors
///
/// Returns an error if startup must abort: the unified data key is
/// unusable, the plugin fails while its failures are fatal, or `cancel`
/// fires mid-migration.
pub async fn start(
    config: &MigratorConfig,
    backends: Backends,
    cancel: &CancellationToken,
) -> anyhow::Result<StartupReport> {
    let policy: Arc<dyn StartupPolicy> = Arc::new(KvStartupPolicy::new(backends.policy));
    let unified: Arc<dyn SecretsKvStore> = Arc::new(UnifiedSecretsStore::new(
        backends.unified,
        data_key(config.unified_key.as_deref(), &config.unified_storage, "unified")?,
    ));

    let gate = Arc::new(PluginGate::new(config.plugin.clone()));
    if let Err(reason) = gate.should_migrate() {
        info!(reason = %reason, "serving secrets from the unified store");
        return Ok(StartupReport {
            active: ActiveStore::Unified,
            outcome: Some(MigrationOutcome::Skipped { reason }),
        });
    }
    let plugin_id = config.plugin.installed_plugin.clone().unwrap_or_default();

    let plugin_backend = backends.plugin.and_then(|backend| {
        let key = data_key(config.plugin_key.as_deref(), &config.plugin_storage, "plugin")?;
        Ok(UnifiedSecretsStore::new(backend, key))
    });
    let plugin_backend = match plugin_backend {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            plugin_failed(policy.as_ref(), &plugin_id, &e).await?;
            return Ok(StartupReport {
                active: ActiveStore::Unified,
                outcome: None,
            });
        }
    };
    let target = Arc::new(PluginSecretsStore::new(
        plugin_id.clone(),
        plugin_backend,
        Arc::clone(&policy),
    ));

    let runner = MigrationRunner::new(gate, unified, target, Arc::clone(&policy));
    match runner.migrate(cancel).await {
        Ok(outcome @ MigrationOutcome::Completed { migrated }) => {
            info!(plugin = %plugin_id, migrated, "serving secrets from the secrets plugin");
            Ok(StartupReport {
                active: ActiveStore::Plugin { plugin_id },
                outcome: Some(outcome),
            })
        }
        Ok(outcome) => {
            info!(outcome = ?outcome, "serving secrets from the unified store");
            Ok(StartupReport {
                active: ActiveStore::Unified,
                outcome: Some(outcome),
            })
        }
        Err(MigrationError::Cancelled) => anyhow::bail!("startup cancelled during secrets migration"),
        Err(e) => {
            let e = anyhow::Error::new(e);
            plugin_failed(policy.as_ref(), &plugin_id, &e).await?;
            Ok(StartupReport {
                active: ActiveStore::Unified,
                outcome: None,
            })
        }
    }
}

/// Apply the startup policy to a plugin failure. An unreadable flag counts
/// as non-fatal.
async fn plugin_failed(
    policy: &dyn StartupPolicy,
    plugin_id: &str,
    failure: &anyhow::Error,
) -> anyhow::Result<()> {
    let fatal = policy.is_fatal().await.unwrap_or_else(|e| {
        warn!(error = %e, "cannot read secrets plugin startup policy, assuming non-fatal");
        false
    });
    if fatal {
        error!(plugin = %plugin_id, error = %failure, "secrets plugin failed and its failures are fatal");
        anyhow::bail!("secrets plugin {plugin_id} failed: {failure:#}");
    }
    warn!(
        plugin = %plugin_id,
        error = %failure,
        "secrets plugin failed, continuing on the unified store"
    );
    Ok(())
}
