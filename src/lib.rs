//! # Hierarchical Cache
//!
//! A three-tier object cache with hierarchical parameter search.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HierarchicalCache                      │
//! │  • put / get / search / link / invalidate                  │
//! │  • striped per-identity locks, global lock for bulk ops    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     L1: Local (in-process)                  │
//! │  • bounded LRU, key / alias / pattern indexes              │
//! │  • lazy TTL + residency cap                                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!            (fallback strategy decides order on a miss)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     L2: Remote (Redis)                      │
//! │  • shared between processes                                │
//! │  • eviction write-back target                              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  L3: Persistent (SQLite/MySQL)              │
//! │  • durable, survives restarts                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each value is stored under a primary key, an optional numeric alias, or
//! both, plus a set of leveled [`SearchParameter`]s describing where it sits
//! in a domain hierarchy (region → category → brand → product). Any subset
//! of that hierarchy finds it again, gaps included.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hierarchical_cache::{CacheConfig, CallOptions, HierarchicalCache, SearchParameter};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = CacheConfig {
//!         redis_url: Some("redis://localhost:6379".into()),
//!         sql_url: Some("sqlite://cache.db?mode=rwc".into()),
//!         persistent_enabled: true,
//!         ..Default::default()
//!     };
//!     let cache: HierarchicalCache<String> = HierarchicalCache::connect(config).await;
//!
//!     let params = [
//!         SearchParameter::new("region", "emea", 0).unwrap(),
//!         SearchParameter::new("category", "shoes", 1).unwrap(),
//!         SearchParameter::new("brand", "acme", 2).unwrap(),
//!     ];
//!     let opts = CallOptions::default();
//!     cache.put(("sku-1", 1001i64), &params, "Trail runner".into(), &opts).await.unwrap();
//!
//!     // by key, by alias, or by a gapped slice of the hierarchy
//!     assert!(cache.get("sku-1", &opts).await.is_some());
//!     assert!(cache.get(1001i64, &opts).await.is_some());
//!     let hits = cache.search(&[params[0].clone(), params[2].clone()], &opts).await;
//!     assert_eq!(hits.len(), 1);
//!
//!     cache.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: the [`HierarchicalCache`] orchestrating all tiers
//! - [`storage`]: local tier and the Memory/Redis/SQL adapters
//! - [`search`]: pattern generation and the pattern index
//! - [`locking`]: striped lock table
//! - [`stats`]: atomic statistics
//! - [`resilience`]: retry with backoff for adapters

pub mod config;
pub mod coordinator;
pub mod entry;
pub mod error;
pub mod locking;
pub mod metrics;
pub mod options;
pub mod parameter;
pub mod resilience;
pub mod search;
pub mod stats;
pub mod storage;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::{CacheConfig, FallbackStrategy, Tier};
pub use coordinator::{CacheBuilder, CacheValue, HierarchicalCache, SharedTier};
pub use entry::{CacheEntry, Locator, StoredEntry};
pub use error::{CacheError, Result};
pub use options::CallOptions;
pub use parameter::SearchParameter;
pub use resilience::retry::RetryConfig;
pub use search::PatternIndex;
pub use stats::{StatisticsSnapshot, TierSnapshot};
pub use storage::memory::MemoryTier;
pub use storage::redis::RedisTier;
pub use storage::sql::SqlTier;
pub use storage::traits::{StorageError, TierStore};
