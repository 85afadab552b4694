//! Redis remote tier.
//!
//! Key layout (all under the configured prefix):
//!
//! ```text
//! {prefix}entry:{identity}     JSON record                 PX = remaining TTL
//! {prefix}key:{key}            -> identity                 PX = remaining TTL
//! {prefix}alias:{alias}        -> identity                 PX = remaining TTL
//! {prefix}pattern:{pattern}    SET of identities
//! {prefix}patterns:{identity}  SET of patterns (reverse)   PX = remaining TTL
//! ```
//!
//! Pattern sets are shared between entries so they carry no TTL. Identities
//! whose record has expired are skipped on read and removed from the sets
//! that read touched; [`RedisTier::prune_patterns`] sweeps the rest. Redis
//! deletes a set once its last member goes.
//! Search is `SINTER` over the single-parameter pattern sets, so gapped
//! queries cost the same as contiguous ones.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, Client, Cmd, FromRedisValue};
use tracing::{debug, warn};

use super::traits::{StorageError, TierStore};
use crate::entry::{now_millis, Locator, StoredEntry};
use crate::parameter::{canonicalize, join_pattern, SearchParameter};
use crate::resilience::retry::{retry, RetryConfig};
use crate::search::generate_patterns;

/// Prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "hcache:";

const SCAN_BATCH: usize = 500;

pub struct RedisTier {
    connection: ConnectionManager,
    prefix: String,
}

fn backend(e: redis::RedisError) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Parse a stored record, recomputing its identity from the fields.
fn parse_record(json: &str) -> Result<StoredEntry, StorageError> {
    let raw: StoredEntry = serde_json::from_str(json).map_err(|e| StorageError::Serialization(e.to_string()))?;
    StoredEntry::from_parts(
        raw.key().map(String::from),
        raw.alias(),
        raw.parameters().to_vec(),
        raw.value,
        raw.created_at,
        raw.ttl_ms,
    )
}

impl RedisTier {
    /// Connect with the default key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, DEFAULT_PREFIX).await
    }

    /// Connect with a key prefix, for sharing a Redis instance.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use hierarchical_cache::RedisTier;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys land under "catalog:entry:...", "catalog:key:..." etc.
    /// let tier = RedisTier::with_prefix("redis://localhost", "catalog:").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: &str) -> Result<Self, StorageError> {
        let client = Client::open(connection_string).map_err(backend)?;

        // Use startup config: fail after a few attempts, don't hang forever
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(backend)?;

        Ok(Self {
            connection,
            prefix: prefix.to_string(),
        })
    }

    /// Get the configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn entry_key(&self, identity: &str) -> String {
        format!("{}entry:{}", self.prefix, identity)
    }

    fn key_pointer(&self, key: &str) -> String {
        format!("{}key:{}", self.prefix, key)
    }

    fn alias_pointer(&self, alias: i64) -> String {
        format!("{}alias:{}", self.prefix, alias)
    }

    fn pattern_key(&self, pattern: &str) -> String {
        format!("{}pattern:{}", self.prefix, pattern)
    }

    fn reverse_key(&self, identity: &str) -> String {
        format!("{}patterns:{}", self.prefix, identity)
    }

    /// Run one command with query-mode retry.
    async fn query<T: FromRedisValue + Send>(&self, name: &str, command: Cmd) -> Result<T, StorageError> {
        let conn = self.connection.clone();
        retry(name, &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let command = command.clone();
            async move { command.query_async::<T>(&mut conn).await }
        })
        .await
        .map_err(backend)
    }

    async fn pointer(&self, pointer_key: String) -> Result<Option<String>, StorageError> {
        self.query("redis_get_pointer", cmd("GET").arg(pointer_key).clone()).await
    }

    async fn load(&self, identity: &str) -> Result<Option<StoredEntry>, StorageError> {
        let json: Option<String> = self
            .query("redis_get_entry", cmd("GET").arg(self.entry_key(identity)).clone())
            .await?;
        json.as_deref().map(parse_record).transpose()
    }

    /// Record `locator` reaches, if any.
    async fn resolve(&self, locator: &Locator) -> Result<Option<StoredEntry>, StorageError> {
        let pointer_key = match locator {
            Locator::Key(k) | Locator::KeyAlias { key: k, .. } => self.key_pointer(k),
            Locator::Alias(a) => self.alias_pointer(*a),
        };
        let Some(identity) = self.pointer(pointer_key).await? else {
            return Ok(None);
        };
        Ok(self.load(&identity).await?.filter(|r| r.matches(locator)))
    }

    /// Drop `dead` identities from `sets`. Best-effort: a failure only
    /// leaves them for the next read or sweep.
    async fn prune(&self, sets: &[String], dead: &[String]) {
        let mut pipeline = pipe();
        for set in sets {
            pipeline.cmd("SREM").arg(set).arg(dead).ignore();
        }
        let mut conn = self.connection.clone();
        match pipeline.query_async::<()>(&mut conn).await {
            Ok(()) => debug!(pruned = dead.len(), sets = sets.len(), "Pruned expired identities"),
            Err(e) => warn!(error = %e, "Pattern set pruning failed"),
        }
    }

    /// Sweep every pattern set under the prefix, removing identities whose
    /// record no longer exists. Returns the number of memberships removed.
    pub async fn prune_patterns(&self) -> Result<usize, StorageError> {
        let pattern = format!("{}pattern:*", self.prefix);
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0usize;
        loop {
            let (next, sets): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;
            for set in sets {
                let members: Vec<String> = cmd("SMEMBERS").arg(&set).query_async(&mut conn).await.map_err(backend)?;
                if members.is_empty() {
                    continue;
                }
                let mut exists = pipe();
                for identity in &members {
                    exists.cmd("EXISTS").arg(self.entry_key(identity));
                }
                let live: Vec<bool> = exists.query_async(&mut conn).await.map_err(backend)?;
                let dead: Vec<String> = members
                    .into_iter()
                    .zip(live)
                    .filter_map(|(identity, live)| (!live).then_some(identity))
                    .collect();
                if !dead.is_empty() {
                    removed += dead.len();
                    cmd("SREM").arg(&set).arg(&dead).query_async::<()>(&mut conn).await.map_err(backend)?;
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(removed, prefix = %self.prefix, "Pattern sets swept");
        Ok(removed)
    }

    /// Remove a record, its pointers and its pattern memberships.
    async fn remove_identity(&self, identity: &str, known: Option<&StoredEntry>) -> Result<(), StorageError> {
        let loaded;
        let record = match known {
            Some(r) => Some(r),
            None => {
                loaded = self.load(identity).await?;
                loaded.as_ref()
            }
        };

        let reverse_key = self.reverse_key(identity);
        let patterns: Vec<String> = self
            .query("redis_smembers", cmd("SMEMBERS").arg(&reverse_key).clone())
            .await?;

        let mut pipeline = pipe();
        pipeline.atomic();
        for pattern in &patterns {
            pipeline.cmd("SREM").arg(self.pattern_key(pattern)).arg(identity).ignore();
        }
        pipeline.cmd("DEL").arg(self.entry_key(identity)).arg(&reverse_key).ignore();

        if let Some(record) = record {
            // pointers may already belong to a newer identity
            if let Some(key) = record.key() {
                let pointer_key = self.key_pointer(key);
                if self.pointer(pointer_key.clone()).await?.as_deref() == Some(identity) {
                    pipeline.cmd("DEL").arg(pointer_key).ignore();
                }
            }
            if let Some(alias) = record.alias() {
                let pointer_key = self.alias_pointer(alias);
                if self.pointer(pointer_key.clone()).await?.as_deref() == Some(identity) {
                    pipeline.cmd("DEL").arg(pointer_key).ignore();
                }
            }
        }

        let mut conn = self.connection.clone();
        pipeline.query_async::<()>(&mut conn).await.map_err(backend)
    }
}

#[async_trait]
impl TierStore for RedisTier {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn put(&self, record: &StoredEntry) -> Result<(), StorageError> {
        let ttl_ms = record.remaining_ttl_ms(now_millis());
        if ttl_ms == Some(0) {
            debug!(identity = record.identity(), "Record already expired, not writing");
            return Ok(());
        }

        // retire whatever currently answers to the same key or alias
        let mut retire = Vec::new();
        if let Some(key) = record.key() {
            retire.extend(self.pointer(self.key_pointer(key)).await?);
        }
        if let Some(alias) = record.alias() {
            retire.extend(self.pointer(self.alias_pointer(alias)).await?);
        }
        retire.push(record.identity().to_string());
        retire.sort();
        retire.dedup();
        for identity in &retire {
            self.remove_identity(identity, None).await?;
        }

        let json = serde_json::to_string(record).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let identity = record.identity();
        let patterns = generate_patterns(record.parameters());

        let mut pipeline = pipe();
        pipeline.atomic();
        let set_with_ttl = |pipeline: &mut redis::Pipeline, key: String, value: &str| {
            let command = pipeline.cmd("SET").arg(key).arg(value);
            if let Some(ms) = ttl_ms {
                command.arg("PX").arg(ms);
            }
            command.ignore();
        };
        set_with_ttl(&mut pipeline, self.entry_key(identity), &json);
        if let Some(key) = record.key() {
            set_with_ttl(&mut pipeline, self.key_pointer(key), identity);
        }
        if let Some(alias) = record.alias() {
            set_with_ttl(&mut pipeline, self.alias_pointer(alias), identity);
        }
        if !patterns.is_empty() {
            let reverse_key = self.reverse_key(identity);
            for pattern in &patterns {
                pipeline.cmd("SADD").arg(self.pattern_key(pattern)).arg(identity).ignore();
            }
            pipeline.cmd("SADD").arg(&reverse_key).arg(&patterns).ignore();
            if let Some(ms) = ttl_ms {
                pipeline.cmd("PEXPIRE").arg(&reverse_key).arg(ms).ignore();
            }
        }

        let conn = self.connection.clone();
        retry("redis_put", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let pipeline = pipeline.clone();
            async move { pipeline.query_async::<()>(&mut conn).await }
        })
        .await
        .map_err(backend)
    }

    async fn get(&self, locator: &Locator) -> Result<Option<StoredEntry>, StorageError> {
        Ok(self.resolve(locator).await?.filter(|r| !r.is_expired()))
    }

    async fn search(&self, parameters: &[SearchParameter]) -> Result<Vec<StoredEntry>, StorageError> {
        let query = canonicalize(parameters);
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let sets: Vec<String> = query
            .iter()
            .map(|p| self.pattern_key(&join_pattern(std::slice::from_ref(p))))
            .collect();
        let mut identities: Vec<String> = self.query("redis_sinter", cmd("SINTER").arg(&sets).clone()).await?;
        if identities.is_empty() {
            return Ok(Vec::new());
        }
        identities.sort();

        let keys: Vec<String> = identities.iter().map(|id| self.entry_key(id)).collect();
        let documents: Vec<Option<String>> = self.query("redis_mget", cmd("MGET").arg(&keys).clone()).await?;

        let now = now_millis();
        let mut records = Vec::with_capacity(documents.len());
        let mut dead = Vec::new();
        for (identity, json) in identities.into_iter().zip(documents) {
            let Some(json) = json else {
                dead.push(identity);
                continue;
            };
            let record = parse_record(&json)?;
            if record.is_expired_at(now) {
                dead.push(identity);
            } else {
                records.push(record);
            }
        }
        if !dead.is_empty() {
            self.prune(&sets, &dead).await;
        }
        Ok(records)
    }

    async fn invalidate(&self, locator: &Locator) -> Result<(), StorageError> {
        match self.resolve(locator).await? {
            Some(record) => {
                let identity = record.identity().to_string();
                self.remove_identity(&identity, Some(&record)).await
            }
            None => Ok(()),
        }
    }

    async fn invalidate_all(&self) -> Result<(), StorageError> {
        let pattern = format!("{}*", self.prefix);
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;
            if !keys.is_empty() {
                deleted += keys.len();
                cmd("DEL").arg(&keys).query_async::<()>(&mut conn).await.map_err(backend)?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(deleted, prefix = %self.prefix, "Redis tier cleared");
        Ok(())
    }
}
