//! Startup configuration for `keyshift`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `KEYSHIFT_*` environment variables.

use std::fmt;

use keyshift_core::gate::PluginSettings;

/// Where a store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on exit).
    Memory,
    /// One PostgreSQL table.
    Postgres { url: String, table: String },
}

/// Runner configuration.
#[derive(Clone)]
pub struct MigratorConfig {
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Backend of the unified secrets store (migration source).
    pub unified_storage: StorageBackendType,
    /// Backend of the secrets plugin (migration target).
    pub plugin_storage: StorageBackendType,
    /// Backend of the startup policy flag.
    pub policy_storage: StorageBackendType,
    /// Hex data key for the unified store.
    pub unified_key: Option<String>,
    /// Hex data key for the plugin backend.
    pub plugin_key: Option<String>,
    /// Secrets plugin gate settings.
    pub plugin: PluginSettings,
    /// Upper bound on the whole startup sequence, in seconds.
    pub startup_timeout_secs: u64,
}

impl fmt::Debug for MigratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let presence = |key: &Option<String>| if key.is_some() { "[set]" } else { "[unset]" };
        f.debug_struct("MigratorConfig")
            .field("log_level", &self.log_level)
            .field("unified_storage", &redact(&self.unified_storage))
            .field("plugin_storage", &redact(&self.plugin_storage))
            .field("policy_storage", &redact(&self.policy_storage))
            .field("unified_key", &presence(&self.unified_key))
            .field("plugin_key", &presence(&self.plugin_key))
            .field("plugin", &self.plugin)
            .field("startup_timeout_secs", &self.startup_timeout_secs)
            .finish()
    }
}

/// Database URLs may carry credentials; show the table only.
fn redact(storage: &StorageBackendType) -> String {
    match storage {
        StorageBackendType::Memory => "memory".to_owned(),
        StorageBackendType::Postgres { table, .. } => format!("postgres({table})"),
    }
}

fn flag(value: Option<String>, default: bool) -> bool {
    value.map_or(default, |v| matches!(v.trim(), "true" | "1" | "yes" | "on"))
}

impl MigratorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `KEYSHIFT_LOG_LEVEL`: log filter (default: `info`)
    /// - `KEYSHIFT_STORAGE`: `memory` or `postgres` (default: `memory`)
    /// - `DATABASE_URL`: PostgreSQL connection string (used when `KEYSHIFT_STORAGE=postgres`)
    /// - `KEYSHIFT_UNIFIED_TABLE`: unified secrets table (default: `unified_secrets`)
    /// - `KEYSHIFT_PLUGIN_TABLE`: plugin secrets table (default: `plugin_secrets`)
    /// - `KEYSHIFT_KV_TABLE`: startup policy table (default: `kv_store`)
    /// - `KEYSHIFT_UNIFIED_KEY` / `KEYSHIFT_PLUGIN_KEY`: 64-char hex data keys
    /// - `KEYSHIFT_FEATURE_SECRETS_STORE_PLUGIN`: feature toggle (default: `false`)
    /// - `KEYSHIFT_USE_PLUGIN`: select the plugin as secrets store (default: `false`)
    /// - `KEYSHIFT_PLUGIN_ID`: id of the installed secrets manager plugin
    /// - `KEYSHIFT_STARTUP_TIMEOUT`: seconds before startup is cancelled (default: `30`)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_owned());

        let backend = |table_var: &str, default_table: &str| {
            match var("KEYSHIFT_STORAGE", "memory").to_lowercase().as_str() {
                "postgres" | "postgresql" => StorageBackendType::Postgres {
                    url: var("DATABASE_URL", "postgres://localhost/keyshift"),
                    table: var(table_var, default_table),
                },
                _ => StorageBackendType::Memory,
            }
        };

        let plugin = PluginSettings {
            feature_enabled: flag(lookup("KEYSHIFT_FEATURE_SECRETS_STORE_PLUGIN"), false),
            use_plugin: flag(lookup("KEYSHIFT_USE_PLUGIN"), false),
            installed_plugin: lookup("KEYSHIFT_PLUGIN_ID").filter(|id| !id.trim().is_empty()),
        };

        Self {
            log_level: var("KEYSHIFT_LOG_LEVEL", "info"),
            unified_storage: backend("KEYSHIFT_UNIFIED_TABLE", "unified_secrets"),
            plugin_storage: backend("KEYSHIFT_PLUGIN_TABLE", "plugin_secrets"),
            policy_storage: backend("KEYSHIFT_KV_TABLE", "kv_store"),
            unified_key: lookup("KEYSHIFT_UNIFIED_KEY"),
            plugin_key: lookup("KEYSHIFT_PLUGIN_KEY"),
            plugin,
            startup_timeout_secs: lookup("KEYSHIFT_STARTUP_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> MigratorConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        MigratorConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_are_in_memory_with_plugin_disabled() {
        let cfg = config(&[]);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.unified_storage, StorageBackendType::Memory);
        assert_eq!(cfg.plugin, PluginSettings::default());
        assert_eq!(cfg.startup_timeout_secs, 30);
    }

    #[test]
    fn postgres_storage_uses_per_store_tables() {
        let cfg = config(&[
            ("KEYSHIFT_STORAGE", "Postgres"),
            ("DATABASE_URL", "postgres://u:p@db/app"),
            ("KEYSHIFT_PLUGIN_TABLE", "vault_secrets"),
        ]);
        assert_eq!(
            cfg.plugin_storage,
            StorageBackendType::Postgres {
                url: "postgres://u:p@db/app".to_owned(),
                table: "vault_secrets".to_owned(),
            }
        );
        assert!(matches!(
            cfg.unified_storage,
            StorageBackendType::Postgres { ref table, .. } if table == "unified_secrets"
        ));
    }

    #[test]
    fn plugin_settings_are_parsed() {
        let cfg = config(&[
            ("KEYSHIFT_FEATURE_SECRETS_STORE_PLUGIN", "true"),
            ("KEYSHIFT_USE_PLUGIN", "1"),
            ("KEYSHIFT_PLUGIN_ID", "acme-secrets"),
            ("KEYSHIFT_STARTUP_TIMEOUT", "nope"),
        ]);
        assert!(cfg.plugin.feature_enabled);
        assert!(cfg.plugin.use_plugin);
        assert_eq!(cfg.plugin.installed_plugin.as_deref(), Some("acme-secrets"));
        assert_eq!(cfg.startup_timeout_secs, 30);
    }

    #[test]
    fn debug_hides_keys_and_database_urls() {
        let cfg = config(&[
            ("KEYSHIFT_STORAGE", "postgres"),
            ("DATABASE_URL", "postgres://user:hunter2@db/app"),
            ("KEYSHIFT_UNIFIED_KEY", "deadbeef"),
        ]);
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("deadbeef"));
        assert!(debug.contains("[set]"));
    }
}
