//! Secret identity and records.
//!
//! A secret is identified by `(org_id, namespace, kind)` in every store. The
//! namespace is usually the UID of the resource that owns the secret (for
//! example a datasource) and the kind says what the value is for.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The unique key of a secret across all stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecretKey {
    pub org_id: i64,
    pub namespace: String,
    pub kind: String,
}

impl SecretKey {
    #[must_use]
    pub fn new(org_id: i64, namespace: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            org_id,
            namespace: namespace.into(),
            kind: kind.into(),
        }
    }

    /// Encode as a `/`-separated storage path under `prefix`.
    ///
    /// Namespace and kind are percent-encoded so a `/` inside them cannot be
    /// mistaken for a separator.
    #[must_use]
    pub fn to_path(&self, prefix: &str) -> String {
        format!(
            "{prefix}{}/{}/{}",
            self.org_id,
            urlencoding::encode(&self.namespace),
            urlencoding::encode(&self.kind)
        )
    }

    /// Inverse of [`to_path`](Self::to_path). Returns `None` for paths that
    /// were not produced by it.
    #[must_use]
    pub fn from_path(prefix: &str, path: &str) -> Option<Self> {
        let rest = path.strip_prefix(prefix)?;
        let mut parts = rest.split('/');
        let org_id = parts.next()?.parse().ok()?;
        let namespace = urlencoding::decode(parts.next()?).ok()?.into_owned();
        let kind = urlencoding::decode(parts.next()?).ok()?.into_owned();
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            org_id,
            namespace,
            kind,
        })
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.org_id, self.namespace, self.kind)
    }
}

/// One migratable secret: its key plus the decrypted value.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretItem {
    pub key: SecretKey,
    pub value: String,
}

impl SecretItem {
    #[must_use]
    pub fn new(
        org_id: i64,
        namespace: impl Into<String>,
        kind: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            key: SecretKey::new(org_id, namespace, kind),
            value: value.into(),
        }
    }
}

// Values are secrets; keep them out of debug output and logs.
impl fmt::Debug for SecretItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretItem")
            .field("key", &self.key)
            .field("value", &"[REDACTED]")
            .finish()
    }
}
