//! Call-scoped options.
//!
//! Every coordinator call takes a [`CallOptions`] value that overrides the
//! global configuration for that one call. Nothing is carried between calls.
//!
//! # Example
//!
//! ```rust
//! use hierarchical_cache::{CallOptions, FallbackStrategy};
//! use std::time::Duration;
//!
//! // Default: follow the cache configuration
//! let opts = CallOptions::default();
//!
//! // Bypass the local tier entirely
//! let opts = CallOptions::skip_local();
//!
//! // Re-read from the slower tiers and refresh the local copy
//! let opts = CallOptions::refresh().with_fallback(FallbackStrategy::PersistentOnly);
//!
//! // Custom TTL for this write
//! let opts = CallOptions::default().with_ttl(Duration::from_secs(30));
//! ```

use std::time::Duration;

use crate::config::FallbackStrategy;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Overrides `CacheConfig::fallback_strategy`
    pub fallback: Option<FallbackStrategy>,
    /// Skip the local read, but still refresh the local copy on a hit
    pub force_refresh: bool,
    /// Neither read nor populate the local tier
    pub skip_local: bool,
    /// Overrides `CacheConfig::default_ttl_ms` for writes
    pub ttl: Option<Duration>,
    /// Overrides `CacheConfig::tier_timeout_ms`
    pub timeout: Option<Duration>,
}

impl CallOptions {
    #[must_use]
    pub fn skip_local() -> Self {
        Self {
            skip_local: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, strategy: FallbackStrategy) -> Self {
        self.fallback = Some(strategy);
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Should this call read from the local tier?
    #[must_use]
    pub fn reads_local(&self) -> bool {
        !self.skip_local && !self.force_refresh
    }

    /// Should this call write to the local tier?
    #[must_use]
    pub fn writes_local(&self) -> bool {
        !self.skip_local
    }
}
