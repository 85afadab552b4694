// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Caller-facing error type.
//!
//! Only [`CacheError::Validation`] and [`CacheError::LinkConflict`] ever
//! escape a public [`HierarchicalCache`](crate::HierarchicalCache) call.
//! [`CacheError::TierUnavailable`] is produced internally whenever a remote
//! or persistent adapter fails or times out; the coordinator logs it, counts
//! it, and degrades to the next tier.

use thiserror::Error;

use crate::storage::traits::StorageError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The caller violated a precondition (missing key and alias,
    /// malformed search parameter, ...). Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A `link` target already carries a conflicting association.
    #[error("link conflict: {0}")]
    LinkConflict(String),

    /// A remote/persistent adapter call failed or timed out.
    #[error("tier {tier} unavailable: {reason}")]
    TierUnavailable { tier: &'static str, reason: String },
}

impl CacheError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn link_conflict(msg: impl Into<String>) -> Self {
        Self::LinkConflict(msg.into())
    }

    pub(crate) fn tier(tier: &'static str, err: &StorageError) -> Self {
        Self::TierUnavailable {
            tier,
            reason: err.to_string(),
        }
    }

    /// Short label used for metrics and log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::LinkConflict(_) => "link_conflict",
            Self::TierUnavailable { .. } => "tier_unavailable",
        }
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = CacheError::validation("key and alias are both absent");
        assert_eq!(err.to_string(), "validation failed: key and alias are both absent");

        let err = CacheError::link_conflict("alias 7 already linked");
        assert_eq!(err.to_string(), "link conflict: alias 7 already linked");
    }

    #[test]
    fn test_tier_error_wraps_storage_error() {
        let err = CacheError::tier("remote", &StorageError::Backend("connection reset".into()));
        assert_eq!(err.kind(), "tier_unavailable");
        assert!(err.to_string().contains("remote"));
        assert!(err.to_string().contains("connection reset"));
    }
}
