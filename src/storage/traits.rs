use async_trait::async_trait;
use thiserror::Error;

use crate::entry::{Locator, StoredEntry};
use crate::parameter::SearchParameter;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("{tier} call timed out after {after_ms}ms")]
    Timeout { tier: &'static str, after_ms: u64 },
}

/// Contract shared by the remote and persistent tiers.
///
/// Every method must tolerate concurrent callers. Errors are always
/// recoverable from the coordinator's point of view: it logs them, counts
/// them and degrades to the next tier.
///
/// Records are addressed three ways: by identity (row key), by key/alias
/// pointer, and by parameter pattern. `put` replaces any record reachable
/// through the new record's key or alias, so a tier never holds two live
/// records for the same access path.
#[async_trait]
pub trait TierStore: Send + Sync {
    /// Backend label used in logs ("memory", "redis", "sql", ...).
    fn name(&self) -> &'static str;

    async fn put(&self, record: &StoredEntry) -> Result<(), StorageError>;

    /// Point lookup. Expired records are reported as absent.
    async fn get(&self, locator: &Locator) -> Result<Option<StoredEntry>, StorageError>;

    /// Every live record whose parameter set contains all of `parameters`.
    async fn search(&self, parameters: &[SearchParameter]) -> Result<Vec<StoredEntry>, StorageError>;

    /// Remove the whole record reachable through `locator`, including its
    /// other access path and pattern registrations. Missing is not an error.
    async fn invalidate(&self, locator: &Locator) -> Result<(), StorageError>;

    async fn invalidate_all(&self) -> Result<(), StorageError>;

    async fn shutdown(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
