//! One-shot migration of unified secrets into the secrets plugin.
//!
//! The run has two phases:
//!
//! 1. **Copy**: every secret from the source store is written to the target
//!    store, in enumeration order. The first failed write ends the run and
//!    nothing is deleted.
//! 2. **Clean up**: the same secrets are deleted from the source store, in
//!    the same order. If the very first delete fails the source still holds
//!    every secret, so plugin startup failures are reverted to non-fatal
//!    (unless they were fatal before the run started).
//!
//! The run is not transactional: after a failed clean-up some secrets exist
//! in both stores until the next startup repeats the migration.
//!
//! Only copy failures, delete failures and cancellation reach the caller.
//! A closed gate, a failed enumeration or an unreadable policy flag are
//! logged and reported as a successful [`MigrationOutcome`], so a
//! best-effort migration never blocks startup.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{GateError, MigrationError};
use crate::gate::MigrationGate;
use crate::kvstore::SecretsKvStore;
use crate::startup::StartupPolicy;

/// How a migration run that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The gate is closed; no store was touched.
    Skipped { reason: GateError },
    /// The source store could not be enumerated; retried on next startup.
    Deferred { reason: String },
    /// Every secret was copied and removed from the source store.
    Completed { migrated: usize },
}

/// Moves all secrets from a source store into a target store.
pub struct MigrationRunner {
    gate: Arc<dyn MigrationGate>,
    source: Arc<dyn SecretsKvStore>,
    target: Arc<dyn SecretsKvStore>,
    policy: Arc<dyn StartupPolicy>,
}

impl std::fmt::Debug for MigrationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRunner").finish_non_exhaustive()
    }
}

/// Race `fut` against cancellation. Cancellation wins ties.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, MigrationError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(MigrationError::Cancelled),
        out = fut => Ok(out),
    }
}

impl MigrationRunner {
    #[must_use]
    pub fn new(
        gate: Arc<dyn MigrationGate>,
        source: Arc<dyn SecretsKvStore>,
        target: Arc<dyn SecretsKvStore>,
        policy: Arc<dyn StartupPolicy>,
    ) -> Self {
        Self {
            gate,
            source,
            target,
            policy,
        }
    }

    /// Run the migration once.
    ///
    /// # Errors
    ///
    /// - [`MigrationError::Copy`] if a target write fails (nothing deleted).
    /// - [`MigrationError::Delete`] if a source delete fails.
    /// - [`MigrationError::Cancelled`] if `cancel` fires before the run ends.
    pub async fn migrate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MigrationOutcome, MigrationError> {
        if let Err(reason) = self.gate.should_migrate() {
            debug!(reason = %reason, "secrets plugin migration disabled");
            return Ok(MigrationOutcome::Skipped { reason });
        }
        debug!("starting migration of unified secrets to the secrets plugin");

        let was_fatal = match cancellable(cancel, self.policy.is_fatal()).await? {
            Ok(fatal) => fatal,
            Err(e) => {
                warn!(
                    error = %e,
                    "cannot tell whether plugin startup failures are fatal, migrating anyway"
                );
                false
            }
        };

        let items = match cancellable(cancel, self.source.get_all()).await? {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "cannot enumerate unified secrets, migration deferred");
                return Ok(MigrationOutcome::Deferred {
                    reason: e.to_string(),
                });
            }
        };
        let total = items.len();
        debug!(total, "unified secrets to migrate");

        for (index, item) in items.iter().enumerate() {
            debug!(current = index + 1, total, secret = %item.key, "copying secret");
            cancellable(cancel, self.target.set(&item.key, &item.value))
                .await?
                .map_err(|source| MigrationError::Copy {
                    key: item.key.clone(),
                    source,
                })?;
        }
        info!(total, "copied unified secrets to the secrets plugin");

        for (index, item) in items.iter().enumerate() {
            debug!(current = index + 1, total, secret = %item.key, "removing migrated secret");
            let Err(source) = cancellable(cancel, self.source.del(&item.key)).await? else {
                continue;
            };
            error!(
                secret = %item.key,
                error = %source,
                "failed to delete migrated secret from the unified store"
            );
            if index == 0 && !was_fatal {
                self.revert_startup_policy(cancel).await?;
            }
            return Err(MigrationError::Delete {
                key: item.key.clone(),
                source,
            });
        }
        info!(total, "removed migrated secrets from the unified store");

        Ok(MigrationOutcome::Completed { migrated: total })
    }

    /// Best effort: the unified store is still intact, so the process can
    /// keep running without the plugin.
    async fn revert_startup_policy(&self, cancel: &CancellationToken) -> Result<(), MigrationError> {
        match cancellable(cancel, self.policy.set_fatal(false)).await? {
            Ok(()) => debug!("startup will continue without the secrets plugin"),
            Err(e) => error!(
                error = %e,
                "failed to revert secrets plugin startup failures to non-fatal"
            ),
        }
        Ok(())
    }
}
