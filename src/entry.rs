//! Cached entry data structure.
//!
//! A [`CacheEntry`] is the unit that flows between the tiers. It carries a
//! primary key and/or a numeric alias, the canonical parameter set, the
//! value, and the TTL bookkeeping. Its [`identity`](CacheEntry::identity)
//! is a SHA-256 digest over all three access components, so every tier
//! agrees on the same row key.
//!
//! # Example
//!
//! ```
//! use hierarchical_cache::{CacheEntry, SearchParameter};
//! use std::time::Duration;
//!
//! let params = vec![
//!     SearchParameter::new("category", "shoes", 1).unwrap(),
//!     SearchParameter::new("region", "emea", 0).unwrap(),
//! ];
//! let entry = CacheEntry::new(Some("sku-1".into()), Some(42), &params, "boots", Some(Duration::from_secs(60))).unwrap();
//!
//! assert_eq!(entry.parameters()[0].name(), "region");
//! assert_eq!(entry.identity().len(), 64);
//! assert!(!entry.is_expired());
//! ```

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};
use crate::parameter::{canonicalize, join_pattern, SearchParameter};
use crate::storage::traits::StorageError;

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    duration_millis(SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default())
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[must_use]
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Compute the identity for a key / alias / parameter combination.
///
/// Parameters may be in any order; they are canonicalized first. The
/// digest input length-prefixes the key so that no two distinct
/// combinations share a canonical string.
#[must_use]
pub fn identity(key: Option<&str>, alias: Option<i64>, parameters: &[SearchParameter]) -> String {
    identity_of_canonical(key, alias, &canonicalize(parameters))
}

fn identity_of_canonical(key: Option<&str>, alias: Option<i64>, canonical: &[SearchParameter]) -> String {
    let key_part = match key {
        Some(k) => format!("{}:{}", k.len(), k),
        None => "-".to_string(),
    };
    let alias_part = match alias {
        Some(a) => a.to_string(),
        None => "-".to_string(),
    };
    let input = format!("key={}|alias={}|params={}", key_part, alias_part, join_pattern(canonical));

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// How a caller addresses a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locator {
    Key(String),
    Alias(i64),
    KeyAlias { key: String, alias: i64 },
}

impl Locator {
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Key(k) | Self::KeyAlias { key: k, .. } => Some(k),
            Self::Alias(_) => None,
        }
    }

    #[must_use]
    pub fn alias(&self) -> Option<i64> {
        match self {
            Self::Alias(a) | Self::KeyAlias { alias: a, .. } => Some(*a),
            Self::Key(_) => None,
        }
    }

    /// Build a locator from optional parts. `None` when both are absent.
    #[must_use]
    pub fn from_parts(key: Option<&str>, alias: Option<i64>) -> Option<Self> {
        match (key, alias) {
            (Some(k), Some(a)) => Some(Self::KeyAlias { key: k.to_string(), alias: a }),
            (Some(k), None) => Some(Self::Key(k.to_string())),
            (None, Some(a)) => Some(Self::Alias(a)),
            (None, None) => None,
        }
    }

    /// Lock-table keys for this locator (one per access path).
    #[must_use]
    pub fn lock_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(2);
        if let Some(k) = self.key() {
            keys.push(format!("k:{}", k));
        }
        if let Some(a) = self.alias() {
            keys.push(format!("a:{}", a));
        }
        keys
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => write!(f, "key={}", k),
            Self::Alias(a) => write!(f, "alias={}", a),
            Self::KeyAlias { key, alias } => write!(f, "key={},alias={}", key, alias),
        }
    }
}

impl From<&str> for Locator {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for Locator {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<i64> for Locator {
    fn from(alias: i64) -> Self {
        Self::Alias(alias)
    }
}

impl From<(&str, i64)> for Locator {
    fn from((key, alias): (&str, i64)) -> Self {
        Self::KeyAlias { key: key.to_string(), alias }
    }
}

/// One stored value plus everything needed to find and expire it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    identity: String,
    key: Option<String>,
    alias: Option<i64>,
    parameters: Vec<SearchParameter>,
    /// The cached payload
    pub value: V,
    /// Creation timestamp (epoch millis)
    pub created_at: u64,
    /// Time-to-live in millis, 0 = never expires
    pub ttl_ms: u64,
}

/// The tier-facing record: value already serialized to JSON.
pub type StoredEntry = CacheEntry<serde_json::Value>;

impl<V> CacheEntry<V> {
    /// Create an entry stamped with the current time.
    ///
    /// Fails with [`CacheError::Validation`] when both `key` and `alias` are
    /// absent or the key is empty.
    pub fn new(
        key: Option<String>,
        alias: Option<i64>,
        parameters: &[SearchParameter],
        value: V,
        ttl: Option<Duration>,
    ) -> Result<Self> {
        if key.is_none() && alias.is_none() {
            return Err(CacheError::validation("key and alias are both absent"));
        }
        if key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            return Err(CacheError::validation("key is empty"));
        }

        let parameters = canonicalize(parameters);
        let identity = identity_of_canonical(key.as_deref(), alias, &parameters);
        Ok(Self {
            identity,
            key,
            alias,
            parameters,
            value,
            created_at: now_millis(),
            ttl_ms: ttl.map_or(0, duration_millis),
        })
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    #[must_use]
    pub fn alias(&self) -> Option<i64> {
        self.alias
    }

    /// Canonical (sorted, deduplicated) parameters.
    #[must_use]
    pub fn parameters(&self) -> &[SearchParameter] {
        &self.parameters
    }

    /// The most specific locator for this entry.
    #[must_use]
    pub fn locator(&self) -> Locator {
        // new() rejects entries with neither part
        Locator::from_parts(self.key.as_deref(), self.alias)
            .unwrap_or_else(|| Locator::Key(self.identity.clone()))
    }

    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_ms > 0).then(|| Duration::from_millis(self.ttl_ms))
    }

    /// Absolute expiry (epoch millis), `None` for entries that never expire.
    #[must_use]
    pub fn expires_at(&self) -> Option<u64> {
        (self.ttl_ms > 0).then(|| self.created_at.saturating_add(self.ttl_ms))
    }

    /// Milliseconds left before expiry, `None` for entries that never expire.
    #[must_use]
    pub fn remaining_ttl_ms(&self, now: u64) -> Option<u64> {
        self.expires_at().map(|at| at.saturating_sub(now))
    }

    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.ttl_ms > 0 && now.saturating_sub(self.created_at) > self.ttl_ms
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Does this entry answer to `locator`?
    #[must_use]
    pub fn matches(&self, locator: &Locator) -> bool {
        match locator {
            Locator::Key(k) => self.key.as_deref() == Some(k.as_str()),
            Locator::Alias(a) => self.alias == Some(*a),
            Locator::KeyAlias { key, alias } => {
                self.key.as_deref() == Some(key.as_str()) && self.alias == Some(*alias)
            }
        }
    }

    /// Build the successor entry produced by a link operation. The value,
    /// creation time and TTL carry over; the identity is recomputed.
    #[must_use]
    pub fn relinked(&self, alias: Option<i64>, parameters: &[SearchParameter]) -> Self
    where
        V: Clone,
    {
        let parameters = canonicalize(parameters);
        Self {
            identity: identity_of_canonical(self.key.as_deref(), alias, &parameters),
            key: self.key.clone(),
            alias,
            parameters,
            value: self.value.clone(),
            created_at: self.created_at,
            ttl_ms: self.ttl_ms,
        }
    }

    /// Swap the payload, keeping identity and timing.
    pub fn map_value<U>(self, f: impl FnOnce(V) -> U) -> CacheEntry<U> {
        CacheEntry {
            identity: self.identity,
            key: self.key,
            alias: self.alias,
            parameters: self.parameters,
            value: f(self.value),
            created_at: self.created_at,
            ttl_ms: self.ttl_ms,
        }
    }
}

impl<V: Serialize> CacheEntry<V> {
    /// Serialize the value for a remote or persistent tier.
    pub fn encode(&self) -> Result<StoredEntry, StorageError> {
        let value = serde_json::to_value(&self.value)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(CacheEntry {
            identity: self.identity.clone(),
            key: self.key.clone(),
            alias: self.alias,
            parameters: self.parameters.clone(),
            value,
            created_at: self.created_at,
            ttl_ms: self.ttl_ms,
        })
    }
}

impl StoredEntry {
    /// Deserialize the value coming back from a tier.
    ///
    /// The identity is recomputed from the decoded fields so a record
    /// written under a different scheme can never alias a local entry.
    pub fn decode<V: DeserializeOwned>(self) -> Result<CacheEntry<V>, StorageError> {
        let value: V = serde_json::from_value(self.value)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let parameters = canonicalize(&self.parameters);
        Ok(CacheEntry {
            identity: identity_of_canonical(self.key.as_deref(), self.alias, &parameters),
            key: self.key,
            alias: self.alias,
            parameters,
            value,
            created_at: self.created_at,
            ttl_ms: self.ttl_ms,
        })
    }

    /// Rebuild a record from its stored columns (used by the SQL tier).
    pub fn from_parts(
        key: Option<String>,
        alias: Option<i64>,
        parameters: Vec<SearchParameter>,
        value: serde_json::Value,
        created_at: u64,
        ttl_ms: u64,
    ) -> Result<Self, StorageError> {
        if key.is_none() && alias.is_none() {
            return Err(StorageError::Serialization(
                "stored record has neither key nor alias".to_string(),
            ));
        }
        let parameters = canonicalize(&parameters);
        Ok(Self {
            identity: identity_of_canonical(key.as_deref(), alias, &parameters),
            key,
            alias,
            parameters,
            value,
            created_at,
            ttl_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, value: &str, level: u32) -> SearchParameter {
        SearchParameter::new(name, value, level).unwrap()
    }

    #[test]
    fn test_identity_is_order_independent() {
        let a = vec![param("region", "emea", 0), param("category", "shoes", 1)];
        let b = vec![param("category", "shoes", 1), param("region", "emea", 0)];
        assert_eq!(identity(Some("k"), Some(1), &a), identity(Some("k"), Some(1), &b));
    }

    #[test]
    fn test_identity_distinguishes_components() {
        let p = vec![param("region", "emea", 0)];
        let base = identity(Some("k"), None, &p);
        assert_ne!(base, identity(Some("k"), Some(1), &p));
        assert_ne!(base, identity(Some("k"), None, &[]));
        assert_ne!(base, identity(Some("k2"), None, &p));
        assert_ne!(identity(Some("1"), None, &[]), identity(None, Some(1), &[]));
    }

    #[test]
    fn test_identity_is_hex_sha256() {
        let id = identity(Some("k"), None, &[]);
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_new_requires_key_or_alias() {
        let err = CacheEntry::new(None, None, &[], 1, None).unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));

        let err = CacheEntry::new(Some("  ".into()), None, &[], 1, None).unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));

        assert!(CacheEntry::new(None, Some(5), &[], 1, None).is_ok());
    }

    #[test]
    fn test_expiry() {
        let mut entry = CacheEntry::new(Some("k".into()), None, &[], 1, Some(Duration::from_millis(50))).unwrap();
        entry.created_at = 1_000;
        assert!(!entry.is_expired_at(1_050));
        assert!(entry.is_expired_at(1_051));
        assert_eq!(entry.expires_at(), Some(1_050));
        assert_eq!(entry.remaining_ttl_ms(1_020), Some(30));

        let forever = CacheEntry::new(Some("k".into()), None, &[], 1, None).unwrap();
        assert!(!forever.is_expired_at(u64::MAX));
        assert_eq!(forever.ttl(), None);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let entry = CacheEntry::new(Some("k".into()), None, &[], 1, Some(Duration::MAX)).unwrap();
        assert_eq!(entry.ttl_ms, u64::MAX);
        assert_eq!(entry.expires_at(), Some(u64::MAX));
        assert!(!entry.is_expired_at(u64::MAX - 1));
        assert_eq!(duration_millis(Duration::from_millis(1_500)), 1_500);
    }

    #[test]
    fn test_matches_locator() {
        let entry = CacheEntry::new(Some("A".into()), Some(7), &[], 1, None).unwrap();
        assert!(entry.matches(&Locator::from("A")));
        assert!(entry.matches(&Locator::Alias(7)));
        assert!(entry.matches(&Locator::from(("A", 7i64))));
        assert!(!entry.matches(&Locator::from(("A", 8i64))));
        assert!(!entry.matches(&Locator::from("B")));
    }

    #[test]
    fn test_relinked_keeps_timing() {
        let entry = CacheEntry::new(Some("A".into()), None, &[param("region", "emea", 0)], 1, Some(Duration::from_secs(5))).unwrap();
        let linked = entry.relinked(Some(100), entry.parameters());
        assert_ne!(linked.identity(), entry.identity());
        assert_eq!(linked.alias(), Some(100));
        assert_eq!(linked.created_at, entry.created_at);
        assert_eq!(linked.ttl_ms, entry.ttl_ms);
        assert_eq!(linked.identity(), identity(Some("A"), Some(100), entry.parameters()));
    }

    #[test]
    fn test_encode_decode_preserves_identity() {
        let entry = CacheEntry::new(Some("A".into()), Some(3), &[param("region", "emea", 0)], vec![1, 2, 3], None).unwrap();
        let stored = entry.encode().unwrap();
        let json = serde_json::to_string(&stored).unwrap();
        let back: StoredEntry = serde_json::from_str(&json).unwrap();
        let decoded: CacheEntry<Vec<i32>> = back.decode().unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_decode_type_mismatch_is_serialization_error() {
        let entry = CacheEntry::new(Some("A".into()), None, &[], "text", None).unwrap();
        let err = entry.encode().unwrap().decode::<u64>().unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[test]
    fn test_lock_keys() {
        assert_eq!(Locator::from("A").lock_keys(), vec!["k:A"]);
        assert_eq!(Locator::Alias(9).lock_keys(), vec!["a:9"]);
        assert_eq!(Locator::from(("A", 9i64)).lock_keys(), vec!["k:A", "a:9"]);
    }
}
