// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL persistent tier (SQLite or MySQL through the sqlx `Any` driver).
//!
//! ```sql
//! CREATE TABLE hierarchical_cache (
//!   id VARCHAR(64) PRIMARY KEY,   -- entry identity
//!   string_key VARCHAR(255),      -- primary key, NULL when alias-only
//!   long_key BIGINT,              -- alias, NULL when absent
//!   value_data LONGTEXT,          -- value as JSON
//!   parameters LONGTEXT,          -- canonical parameters as JSON
//!   created_at BIGINT,
//!   ttl_millis BIGINT,            -- 0 = never expires
//!   expires_at BIGINT             -- created_at + ttl_millis, 0 = never
//! );
//! CREATE TABLE cache_param_index (
//!   param_pattern VARCHAR(512),
//!   unique_id VARCHAR(64),
//!   PRIMARY KEY (param_pattern, unique_id)
//! );
//! ```
//!
//! Every read filters `expires_at = 0 OR expires_at > now`, so expired rows
//! are invisible even before [`SqlTier::purge_expired`] deletes them.
//!
//! ## sqlx Any Driver Quirks
//!
//! TEXT columns come back as `String` from SQLite but as bytes from MySQL
//! LONGTEXT, so text is read with a `String` then `Vec<u8>` fallback.

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{StorageError, TierStore};
use crate::entry::{now_millis, Locator, StoredEntry};
use crate::parameter::{canonicalize, join_pattern, SearchParameter};
use crate::resilience::retry::{is_transient, retry_if, RetryConfig};
use crate::search::generate_patterns;

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const SELECT_COLUMNS: &str = "id, string_key, long_key, value_data, parameters, created_at, ttl_millis";

const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS hierarchical_cache (
        id TEXT PRIMARY KEY,
        string_key TEXT,
        long_key INTEGER,
        value_data TEXT NOT NULL,
        parameters TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        ttl_millis INTEGER NOT NULL DEFAULT 0,
        expires_at INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_hc_string_key ON hierarchical_cache (string_key)",
    "CREATE INDEX IF NOT EXISTS idx_hc_long_key ON hierarchical_cache (long_key)",
    "CREATE INDEX IF NOT EXISTS idx_hc_expires_at ON hierarchical_cache (expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS cache_param_index (
        param_pattern TEXT NOT NULL,
        unique_id TEXT NOT NULL,
        PRIMARY KEY (param_pattern, unique_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_cpi_unique_id ON cache_param_index (unique_id)",
];

const MYSQL_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS hierarchical_cache (
        id VARCHAR(64) PRIMARY KEY,
        string_key VARCHAR(255),
        long_key BIGINT,
        value_data LONGTEXT NOT NULL,
        parameters LONGTEXT NOT NULL,
        created_at BIGINT NOT NULL,
        ttl_millis BIGINT NOT NULL DEFAULT 0,
        expires_at BIGINT NOT NULL DEFAULT 0,
        INDEX idx_hc_string_key (string_key),
        INDEX idx_hc_long_key (long_key),
        INDEX idx_hc_expires_at (expires_at)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cache_param_index (
        param_pattern VARCHAR(512) NOT NULL,
        unique_id VARCHAR(64) NOT NULL,
        PRIMARY KEY (param_pattern, unique_id),
        INDEX idx_cpi_unique_id (unique_id)
    )
    "#,
];

/// Epoch or duration millis as a BIGINT, saturating.
fn sql_millis(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn serialization(e: serde_json::Error) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Read a text column as String (SQLite TEXT) or bytes (MySQL LONGTEXT).
fn text_column(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

fn record_from_row(row: &AnyRow) -> Result<StoredEntry, StorageError> {
    let key = text_column(row, "string_key");
    let alias: Option<i64> = row.try_get("long_key").map_err(backend)?;
    let value_json = text_column(row, "value_data")
        .ok_or_else(|| StorageError::Serialization("row has no value_data".to_string()))?;
    let params_json = text_column(row, "parameters").unwrap_or_else(|| "[]".to_string());
    let created_at: i64 = row.try_get("created_at").map_err(backend)?;
    let ttl_millis: i64 = row.try_get("ttl_millis").map_err(backend)?;

    let value = serde_json::from_str(&value_json).map_err(serialization)?;
    let parameters: Vec<SearchParameter> = serde_json::from_str(&params_json).map_err(serialization)?;
    StoredEntry::from_parts(key, alias, parameters, value, created_at.max(0) as u64, ttl_millis.max(0) as u64)
}

/// WHERE fragment for a locator plus the values to bind, in order.
fn locator_filter(locator: &Locator) -> (&'static str, Option<String>, Option<i64>) {
    match locator {
        Locator::Key(k) => ("string_key = ?", Some(k.clone()), None),
        Locator::Alias(a) => ("long_key = ?", None, Some(*a)),
        Locator::KeyAlias { key, alias } => ("string_key = ? AND long_key = ?", Some(key.clone()), Some(*alias)),
    }
}

pub struct SqlTier {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlTier {
    /// Connect and create the schema, with startup-mode retry (fails fast if
    /// the config is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry_if(
            "sql_connect",
            &RetryConfig::startup(),
            || async {
                AnyPoolOptions::new()
                    .max_connections(if is_sqlite { 1 } else { 20 })
                    .acquire_timeout(Duration::from_secs(10))
                    .idle_timeout(Duration::from_secs(300))
                    .connect(connection_string)
                    .await
                    .map_err(backend)
            },
            is_transient,
        )
        .await?;

        let tier = Self { pool, is_sqlite };

        // Enable WAL mode for SQLite (better concurrency, faster writes)
        if is_sqlite {
            tier.enable_wal_mode().await?;
        }

        tier.init_schema().await?;
        info!(sqlite = is_sqlite, "SQL tier ready");
        Ok(tier)
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements = if self.is_sqlite { SQLITE_SCHEMA } else { MYSQL_SCHEMA };
        for sql in statements {
            retry_if(
                "sql_init_schema",
                &RetryConfig::startup(),
                || async { sqlx::query(sql).execute(&self.pool).await.map_err(backend) },
                is_transient,
            )
            .await?;
        }
        Ok(())
    }

    /// Delete every expired row and its index rows. Returns rows deleted.
    pub async fn purge_expired(&self) -> Result<u64, StorageError> {
        let now = sql_millis(now_millis());
        retry_if(
            "sql_purge_expired",
            &RetryConfig::query(),
            || async {
                let mut tx = self.pool.begin().await.map_err(backend)?;
                sqlx::query(
                    "DELETE FROM cache_param_index WHERE unique_id IN \
                     (SELECT id FROM hierarchical_cache WHERE expires_at > 0 AND expires_at <= ?)",
                )
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
                let result = sqlx::query("DELETE FROM hierarchical_cache WHERE expires_at > 0 AND expires_at <= ?")
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
                tx.commit().await.map_err(backend)?;
                Ok(result.rows_affected())
            },
            is_transient,
        )
        .await
    }

    /// Rows currently stored, expired or not.
    pub async fn count_all(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM hierarchical_cache")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let count: i64 = row.try_get("cnt").map_err(backend)?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl TierStore for SqlTier {
    fn name(&self) -> &'static str {
        "sql"
    }

    async fn put(&self, record: &StoredEntry) -> Result<(), StorageError> {
        let id = record.identity().to_string();
        let key = record.key().map(String::from);
        let alias = record.alias();
        let value_json = serde_json::to_string(&record.value).map_err(serialization)?;
        let params_json = serde_json::to_string(record.parameters()).map_err(serialization)?;
        let created_at = sql_millis(record.created_at);
        let ttl_millis = sql_millis(record.ttl_ms);
        let expires_at = sql_millis(record.expires_at().unwrap_or(0));
        let patterns = generate_patterns(record.parameters());

        retry_if(
            "sql_put",
            &RetryConfig::query(),
            || async {
                let mut tx = self.pool.begin().await.map_err(backend)?;

                // retire whatever answers to the same identity, key or alias
                sqlx::query(
                    "DELETE FROM cache_param_index WHERE unique_id IN \
                     (SELECT id FROM hierarchical_cache WHERE id = ? OR string_key = ? OR long_key = ?)",
                )
                .bind(&id)
                .bind(&key)
                .bind(alias)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
                sqlx::query("DELETE FROM hierarchical_cache WHERE id = ? OR string_key = ? OR long_key = ?")
                    .bind(&id)
                    .bind(&key)
                    .bind(alias)
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;

                sqlx::query(
                    "INSERT INTO hierarchical_cache \
                     (id, string_key, long_key, value_data, parameters, created_at, ttl_millis, expires_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(&key)
                .bind(alias)
                .bind(&value_json)
                .bind(&params_json)
                .bind(created_at)
                .bind(ttl_millis)
                .bind(expires_at)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;

                for pattern in &patterns {
                    sqlx::query("INSERT INTO cache_param_index (param_pattern, unique_id) VALUES (?, ?)")
                        .bind(pattern)
                        .bind(&id)
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                }

                tx.commit().await.map_err(backend)?;
                Ok(())
            },
            is_transient,
        )
        .await
    }

    async fn get(&self, locator: &Locator) -> Result<Option<StoredEntry>, StorageError> {
        let (clause, key, alias) = locator_filter(locator);
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM hierarchical_cache \
             WHERE {clause} AND (expires_at = 0 OR expires_at > ?) LIMIT 1"
        );
        let now = sql_millis(now_millis());

        let row = retry_if(
            "sql_get",
            &RetryConfig::query(),
            || async {
                let mut query = sqlx::query(&sql);
                if let Some(k) = &key {
                    query = query.bind(k.clone());
                }
                if let Some(a) = alias {
                    query = query.bind(a);
                }
                query.bind(now).fetch_optional(&self.pool).await.map_err(backend)
            },
            is_transient,
        )
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn search(&self, parameters: &[SearchParameter]) -> Result<Vec<StoredEntry>, StorageError> {
        let query_params = canonicalize(parameters);
        if query_params.is_empty() {
            return Ok(Vec::new());
        }
        let singles: Vec<String> = query_params
            .iter()
            .map(|p| join_pattern(std::slice::from_ref(p)))
            .collect();
        let placeholders = vec!["?"; singles.len()].join(", ");
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM hierarchical_cache WHERE id IN \
             (SELECT unique_id FROM cache_param_index WHERE param_pattern IN ({placeholders}) \
              GROUP BY unique_id HAVING COUNT(DISTINCT param_pattern) = ?) \
             AND (expires_at = 0 OR expires_at > ?) ORDER BY id"
        );
        let needed = singles.len() as i64;
        let now = sql_millis(now_millis());

        let rows = retry_if(
            "sql_search",
            &RetryConfig::query(),
            || async {
                let mut query = sqlx::query(&sql);
                for single in &singles {
                    query = query.bind(single.clone());
                }
                query.bind(needed).bind(now).fetch_all(&self.pool).await.map_err(backend)
            },
            is_transient,
        )
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn invalidate(&self, locator: &Locator) -> Result<(), StorageError> {
        let (clause, key, alias) = locator_filter(locator);
        let index_sql = format!(
            "DELETE FROM cache_param_index WHERE unique_id IN (SELECT id FROM hierarchical_cache WHERE {clause})"
        );
        let row_sql = format!("DELETE FROM hierarchical_cache WHERE {clause}");

        let deleted = retry_if(
            "sql_invalidate",
            &RetryConfig::query(),
            || async {
                let mut tx = self.pool.begin().await.map_err(backend)?;
                let mut deleted = 0;
                for sql in [&index_sql, &row_sql] {
                    let mut query = sqlx::query(sql);
                    if let Some(k) = &key {
                        query = query.bind(k.clone());
                    }
                    if let Some(a) = alias {
                        query = query.bind(a);
                    }
                    deleted = query.execute(&mut *tx).await.map_err(backend)?.rows_affected();
                }
                tx.commit().await.map_err(backend)?;
                Ok(deleted)
            },
            is_transient,
        )
        .await?;

        debug!(locator = %locator, deleted, "SQL rows invalidated");
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), StorageError> {
        retry_if(
            "sql_invalidate_all",
            &RetryConfig::query(),
            || async {
                let mut tx = self.pool.begin().await.map_err(backend)?;
                sqlx::query("DELETE FROM cache_param_index")
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
                sqlx::query("DELETE FROM hierarchical_cache")
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
                tx.commit().await.map_err(backend)
            },
            is_transient,
        )
        .await
    }

    async fn shutdown(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheEntry;
    use serde_json::json;
    use tempfile::TempDir;

    fn p(name: &str, value: &str, level: u32) -> SearchParameter {
        SearchParameter::new(name, value, level).unwrap()
    }

    fn record(key: Option<&str>, alias: Option<i64>, params: &[SearchParameter], ttl: Option<Duration>) -> StoredEntry {
        CacheEntry::new(key.map(String::from), alias, params, json!({"k": key, "a": alias}), ttl).unwrap()
    }

    async fn open(dir: &TempDir) -> SqlTier {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("cache.db").display());
        SqlTier::new(&url).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get_by_each_access_path() {
        let dir = TempDir::new().unwrap();
        let tier = open(&dir).await;
        let rec = record(Some("A"), Some(7), &[p("region", "emea", 0)], None);
        tier.put(&rec).await.unwrap();

        assert_eq!(tier.get(&Locator::Key("A".into())).await.unwrap(), Some(rec.clone()));
        assert_eq!(tier.get(&Locator::Alias(7)).await.unwrap(), Some(rec.clone()));
        assert_eq!(tier.get(&Locator::from(("A", 7i64))).await.unwrap(), Some(rec));
        assert_eq!(tier.get(&Locator::from(("A", 8i64))).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_replaces_same_key_and_alias() {
        let dir = TempDir::new().unwrap();
        let tier = open(&dir).await;
        tier.put(&record(Some("A"), None, &[p("region", "emea", 0)], None)).await.unwrap();
        tier.put(&record(Some("B"), Some(7), &[], None)).await.unwrap();

        // same key as the first, same alias as the second
        let newer = record(Some("A"), Some(7), &[p("region", "apac", 0)], None);
        tier.put(&newer).await.unwrap();

        assert_eq!(tier.count_all().await.unwrap(), 1);
        assert_eq!(tier.get(&Locator::Key("B".into())).await.unwrap(), None);
        assert!(tier.search(&[p("region", "emea", 0)]).await.unwrap().is_empty());
        assert_eq!(tier.search(&[p("region", "apac", 0)]).await.unwrap(), vec![newer]);
    }

    #[tokio::test]
    async fn test_gapped_search() {
        let dir = TempDir::new().unwrap();
        let tier = open(&dir).await;
        let full = [p("region", "emea", 0), p("category", "shoes", 1), p("brand", "acme", 2)];
        let other = [p("region", "emea", 0), p("category", "hats", 1), p("brand", "acme", 2)];
        tier.put(&record(Some("A"), None, &full, None)).await.unwrap();
        tier.put(&record(Some("B"), None, &other, None)).await.unwrap();

        let gapped = tier.search(&[p("region", "emea", 0), p("brand", "acme", 2)]).await.unwrap();
        assert_eq!(gapped.len(), 2);

        let narrow = tier.search(&[p("category", "shoes", 1)]).await.unwrap();
        assert_eq!(narrow.len(), 1);
        assert_eq!(narrow[0].key(), Some("A"));

        assert!(tier.search(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_by_alias_removes_whole_entry() {
        let dir = TempDir::new().unwrap();
        let tier = open(&dir).await;
        let params = [p("region", "emea", 0)];
        tier.put(&record(Some("A"), Some(7), &params, None)).await.unwrap();

        tier.invalidate(&Locator::Alias(7)).await.unwrap();

        assert_eq!(tier.get(&Locator::Key("A".into())).await.unwrap(), None);
        assert!(tier.search(&params).await.unwrap().is_empty());
        // twice is fine
        tier.invalidate(&Locator::Alias(7)).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_rows_are_invisible_and_purged() {
        let dir = TempDir::new().unwrap();
        let tier = open(&dir).await;
        let params = [p("region", "emea", 0)];
        tier.put(&record(Some("A"), None, &params, Some(Duration::from_millis(30)))).await.unwrap();
        tier.put(&record(Some("B"), None, &params, None)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(tier.get(&Locator::Key("A".into())).await.unwrap(), None);
        assert_eq!(tier.search(&params).await.unwrap().len(), 1);
        assert_eq!(tier.purge_expired().await.unwrap(), 1);
        assert_eq!(tier.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let rec = record(Some("A"), Some(7), &[p("region", "emea", 0)], None);
        {
            let tier = open(&dir).await;
            tier.put(&rec).await.unwrap();
            tier.shutdown().await.unwrap();
        }
        let tier = open(&dir).await;
        assert_eq!(tier.get(&Locator::Alias(7)).await.unwrap(), Some(rec));
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let dir = TempDir::new().unwrap();
        let tier = open(&dir).await;
        tier.put(&record(Some("A"), None, &[], None)).await.unwrap();
        tier.put(&record(None, Some(9), &[], None)).await.unwrap();

        tier.invalidate_all().await.unwrap();
        assert_eq!(tier.count_all().await.unwrap(), 0);
    }
}
