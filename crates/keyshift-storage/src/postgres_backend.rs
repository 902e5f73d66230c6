//! PostgreSQL storage backend.
//!
//! Each backend owns one `(key TEXT, value BYTEA)` table whose name is chosen
//! at connect time, so the unified secrets, the plugin secrets and the
//! startup flags can live side by side in one database.
//!
//! Feature-gated behind `postgres-backend`. Uses `sqlx` with the Tokio
//! runtime for fully async operations.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;

use crate::{StorageBackend, StorageError};

/// A storage backend backed by a single PostgreSQL table.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    table: String,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("table", &self.table)
            .field("pool", &"[PgPool]")
            .finish_non_exhaustive()
    }
}

/// Table names are interpolated into SQL, so only `[a-z_][a-z0-9_]*` passes.
fn validate_table_name(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid_head && valid_tail && name.len() <= 63 {
        Ok(())
    } else {
        Err(StorageError::InvalidTableName {
            name: name.to_owned(),
        })
    }
}

impl PostgresBackend {
    /// Connect to PostgreSQL and make sure `table` exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidTableName`] for an unsafe table name and
    /// [`StorageError::Open`] if the connection or table creation fails.
    pub async fn connect(database_url: &str, table: &str) -> Result<Self, StorageError> {
        validate_table_name(table)?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Open {
                location: "[redacted database url]".to_owned(),
                reason: e.to_string(),
            })?;

        Self::with_pool(pool, table).await
    }

    /// Reuse an existing pool for another table.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect), minus the connection step.
    pub async fn with_pool(pool: PgPool, table: &str) -> Result<Self, StorageError> {
        validate_table_name(table)?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
                key   TEXT  PRIMARY KEY, \
                value BYTEA NOT NULL\
            )"
        ))
        .execute(&pool)
        .await
        .map_err(|e| StorageError::Open {
            location: table.to_owned(),
            reason: format!("table creation failed: {e}"),
        })?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_key_prefix ON {table} (key text_pattern_ops)"
        ))
        .execute(&pool)
        .await
        .map_err(|e| StorageError::Open {
            location: table.to_owned(),
            reason: format!("index creation failed: {e}"),
        })?;

        debug!(table = %table, "postgres kv table ready");

        Ok(Self {
            pool,
            table: table.to_owned(),
        })
    }

    /// Return a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Escape `LIKE` metacharacters so prefixes match literally.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len().saturating_add(1));
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait::async_trait]
impl StorageBackend for PostgresBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as(&format!("SELECT value FROM {} WHERE key = $1", self.table))
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Read {
                    key: key.to_owned(),
                    reason: e.to_string(),
                })?;

        Ok(row.map(|(v,)| v))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        sqlx::query(&format!(
            "INSERT INTO {} (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            self.table
        ))
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Write {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query(&format!("DELETE FROM {} WHERE key = $1", self.table))
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Delete {
                key: key.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT key FROM {} WHERE key LIKE $1 ESCAPE '\\' ORDER BY key",
            self.table
        ))
        .bind(like_prefix(prefix))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::List {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let row: (bool,) = sqlx::query_as(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE key = $1)",
            self.table
        ))
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Read {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(row.0)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        sqlx::query_as(&format!(
            "SELECT key, value FROM {} WHERE key LIKE $1 ESCAPE '\\' ORDER BY key",
            self.table
        ))
        .bind(like_prefix(prefix))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::List {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        })
    }
}
