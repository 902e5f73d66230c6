//! Error types for `keyshift-core`.
//!
//! Each variant carries the secret key or record it concerns. Secret values
//! and key material never appear in error messages.

use keyshift_storage::StorageError;

use crate::item::SecretKey;

/// Errors from value encryption.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// Authentication failed: wrong key, wrong associated data, or tampering.
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// Ciphertext is too short to contain a nonce and tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },

    /// A configured data key could not be parsed.
    #[error("invalid data key: {reason}")]
    InvalidKey { reason: String },
}

/// Errors from a secrets key-value store.
#[derive(Debug, thiserror::Error)]
pub enum SecretsStoreError {
    /// The underlying storage backend failed.
    #[error("secrets storage error: {0}")]
    Storage(#[from] StorageError),

    /// Sealing or opening a value failed.
    #[error("secrets crypto error for '{key}': {source}")]
    Crypto {
        key: SecretKey,
        #[source]
        source: CryptoError,
    },

    /// A stored record could not be encoded or decoded.
    #[error("corrupt secret record for '{key}': {reason}")]
    Corrupt { key: SecretKey, reason: String },

    /// The secret to rename does not exist.
    #[error("secret not found: {key}")]
    NotFound { key: SecretKey },

    /// The backend rejected the request for a reason of its own.
    #[error("secrets backend '{backend}' failed: {reason}")]
    Backend { backend: String, reason: String },
}

/// Errors from the startup policy flag.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The flag could not be read or written.
    #[error("startup policy storage error: {0}")]
    Storage(#[from] StorageError),

    /// The stored flag is not `true` or `false`.
    #[error("startup policy value '{value}' is not a boolean")]
    InvalidValue { value: String },
}

/// Reasons the migration gate keeps the migration from running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// The secrets store plugin feature toggle is off.
    #[error("feature toggle '{toggle}' is not enabled")]
    FeatureDisabled { toggle: String },

    /// The plugin is installed but not selected as the secrets store.
    #[error("secrets plugin is not selected as the secrets store")]
    PluginNotSelected,

    /// No secrets manager plugin is installed.
    #[error("no secrets manager plugin is installed")]
    PluginNotInstalled,
}

/// Errors the migration surfaces to its caller.
///
/// Everything else (gate, enumeration and policy failures) is absorbed and
/// only logged so process startup is never blocked by a best-effort copy.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Writing a secret into the target store failed; nothing was deleted.
    #[error("failed to copy secret '{key}' to the target store: {source}")]
    Copy {
        key: SecretKey,
        #[source]
        source: SecretsStoreError,
    },

    /// Deleting a migrated secret from the source store failed.
    #[error("failed to delete migrated secret '{key}' from the source store: {source}")]
    Delete {
        key: SecretKey,
        #[source]
        source: SecretsStoreError,
    },

    /// The caller cancelled the run; finished steps are not rolled back.
    #[error("secrets migration cancelled")]
    Cancelled,
}

/// Errors from the API key store.
#[derive(Debug, thiserror::Error)]
pub enum ApiKeyError {
    /// No key with the given id exists in the organization.
    #[error("API key not found")]
    NotFound,

    /// Lookup by name or hash found nothing.
    #[error("invalid API key")]
    InvalidKey,

    /// An API key with the same name already exists in the organization.
    #[error("API key, organization ID and name must be unique")]
    Duplicate,

    /// `seconds_to_live` was negative.
    #[error("negative value for SecondsToLive")]
    InvalidExpiration,

    /// A stored record could not be encoded or decoded.
    #[error("corrupt API key record: {reason}")]
    Corrupt { reason: String },

    /// The underlying storage backend failed.
    #[error("API key storage error: {0}")]
    Storage(#[from] StorageError),
}
