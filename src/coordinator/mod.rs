// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tier coordinator.
//!
//! The [`HierarchicalCache`] ties the three tiers together:
//! - **L1 local**: bounded LRU with key, alias and pattern indexes
//! - **L2 remote**: shared tier behind [`TierStore`] (Redis in production)
//! - **L3 persistent**: durable tier behind [`TierStore`] (SQL in production)
//!
//! Reads try L1, then L2/L3 in [`FallbackStrategy`](crate::FallbackStrategy)
//! order, populating faster tiers from a slower-tier hit. Writes go to L1
//! and, with write-through, to every enabled slower tier independently.
//! Remote/persistent failures and timeouts are logged, counted and absorbed:
//! only validation errors and link conflicts reach the caller.
//!
//! # Example
//!
//! ```rust
//! use hierarchical_cache::{CacheConfig, CallOptions, HierarchicalCache, MemoryTier, SearchParameter};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache: HierarchicalCache<String> = HierarchicalCache::builder(CacheConfig::default())
//!     .remote(Arc::new(MemoryTier::new()))
//!     .build();
//!
//! let region = SearchParameter::new("region", "emea", 0).unwrap();
//! let opts = CallOptions::default();
//! cache.put("sku-1", &[region.clone()], "boots".to_string(), &opts).await.unwrap();
//!
//! assert_eq!(cache.get("sku-1", &opts).await.as_deref(), Some("boots"));
//! assert_eq!(cache.search(&[region], &opts).await, vec!["boots".to_string()]);
//! # }
//! ```

mod types;
mod api;
mod search_api;
mod link;
mod invalidate;
mod lifecycle;
mod write_back;

pub use types::{CacheValue, SharedTier};

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, Tier};
use crate::entry::{duration_millis, now_millis, CacheEntry, Locator};
use crate::error::CacheError;
use crate::locking::LockTable;
use crate::metrics;
use crate::options::CallOptions;
use crate::stats::CacheStatistics;
use crate::storage::local::LocalTier;
use crate::storage::traits::StorageError;

use write_back::WriteBack;

/// Three-tier cache coordinator.
///
/// # Thread Safety
///
/// `Send + Sync`; share it behind an `Arc`. Per-identity operations are
/// serialized by a striped async lock table, in-process state by one short
/// mutex that is never held across an adapter call.
pub struct HierarchicalCache<V> {
    pub(super) config: CacheConfig,

    /// L1: None when local caching is disabled
    pub(super) local: Option<Mutex<LocalTier<V>>>,

    /// L2: remote adapter (optional)
    pub(super) remote: Option<SharedTier>,

    /// L3: persistent adapter (optional)
    pub(super) persistent: Option<SharedTier>,

    pub(super) locks: Arc<LockTable>,

    pub(super) stats: Arc<CacheStatistics>,

    /// Bumped by every write or removal before it releases its locks
    pub(super) mutations: AtomicU64,

    /// Eviction write-back worker (taken on shutdown)
    pub(super) write_back: Mutex<Option<WriteBack>>,
}

/// Assembles a [`HierarchicalCache`] from a config and injected adapters.
pub struct CacheBuilder<V> {
    config: CacheConfig,
    remote: Option<SharedTier>,
    persistent: Option<SharedTier>,
    _value: PhantomData<fn() -> V>,
}

impl<V: CacheValue> CacheBuilder<V> {
    /// Remote tier adapter. Ignored unless `remote_enabled`.
    #[must_use]
    pub fn remote(mut self, tier: SharedTier) -> Self {
        self.remote = Some(tier);
        self
    }

    /// Persistent tier adapter. Ignored unless `persistent_enabled`.
    #[must_use]
    pub fn persistent(mut self, tier: SharedTier) -> Self {
        self.persistent = Some(tier);
        self
    }

    /// Build the cache. Call from inside a tokio runtime so the eviction
    /// write-back worker can start.
    #[must_use]
    pub fn build(self) -> HierarchicalCache<V> {
        let config = self.config;

        let remote = select_tier(Tier::Remote, config.remote_enabled, self.remote);
        let persistent = select_tier(Tier::Persistent, config.persistent_enabled, self.persistent);

        let local = config
            .local_enabled
            .then(|| Mutex::new(LocalTier::new(config.local_max_entries, config.local_ttl())));

        let locks = Arc::new(LockTable::new(config.lock_stripes));
        let stats = Arc::new(CacheStatistics::new());

        let write_back = match (&remote, config.write_through && config.local_enabled) {
            (Some(remote), true) => WriteBack::spawn(
                remote.clone(),
                locks.clone(),
                stats.clone(),
                config.write_back_queue_capacity,
                config.tier_timeout(),
            ),
            _ => None,
        };

        info!(
            local = config.local_enabled,
            remote = remote.as_ref().map(|t| t.name()),
            persistent = persistent.as_ref().map(|t| t.name()),
            fallback = ?config.fallback_strategy,
            "Hierarchical cache ready"
        );

        HierarchicalCache {
            config,
            local,
            remote,
            persistent,
            locks,
            stats,
            mutations: AtomicU64::new(0),
            write_back: Mutex::new(write_back),
        }
    }
}

fn select_tier(tier: Tier, enabled: bool, adapter: Option<SharedTier>) -> Option<SharedTier> {
    match (enabled, adapter) {
        (true, Some(a)) => Some(a),
        (true, None) => {
            debug!(tier = %tier, "Tier enabled but no adapter configured, running without it");
            None
        }
        (false, Some(a)) => {
            debug!(tier = %tier, adapter = a.name(), "Adapter supplied for a disabled tier, ignoring");
            None
        }
        (false, None) => None,
    }
}

impl<V: CacheValue> HierarchicalCache<V> {
    #[must_use]
    pub fn builder(config: CacheConfig) -> CacheBuilder<V> {
        CacheBuilder {
            config,
            remote: None,
            persistent: None,
            _value: PhantomData,
        }
    }

    /// Local tier only.
    #[must_use]
    pub fn local_only(config: CacheConfig) -> Self {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Is `tier` active (enabled and backed by an adapter)?
    #[must_use]
    pub fn has_tier(&self, tier: Tier) -> bool {
        match tier {
            Tier::Local => self.local.is_some(),
            Tier::Remote => self.remote.is_some(),
            Tier::Persistent => self.persistent.is_some(),
        }
    }

    // ---------------------------------------------------------------------
    // Tier plumbing shared by the operation files
    // ---------------------------------------------------------------------

    pub(super) fn timeout_for(&self, options: &CallOptions) -> Duration {
        options.timeout.unwrap_or_else(|| self.config.tier_timeout())
    }

    pub(super) fn store(&self, tier: Tier) -> Option<&SharedTier> {
        match tier {
            Tier::Local => None,
            Tier::Remote => self.remote.as_ref(),
            Tier::Persistent => self.persistent.as_ref(),
        }
    }

    /// Active slower tiers in the order this call should consult them.
    pub(super) fn fallback_tiers(&self, options: &CallOptions) -> Vec<(Tier, SharedTier)> {
        let strategy = options.fallback.unwrap_or(self.config.fallback_strategy);
        strategy
            .order()
            .iter()
            .filter_map(|&tier| self.store(tier).map(|s| (tier, s.clone())))
            .collect()
    }

    /// Every active slower tier (writes and invalidations go to all of them).
    pub(super) fn enabled_tiers(&self) -> Vec<(Tier, SharedTier)> {
        [Tier::Remote, Tier::Persistent]
            .into_iter()
            .filter_map(|tier| self.store(tier).map(|s| (tier, s.clone())))
            .collect()
    }

    /// Run one adapter call under the timeout. Failures are logged and
    /// counted here; callers only decide how to degrade.
    pub(super) async fn call_tier<T, F>(&self, tier: Tier, operation: &'static str, timeout: Duration, call: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(r) => r,
            Err(_) => {
                metrics::record_timeout(tier.as_str());
                Err(StorageError::Timeout {
                    tier: tier.as_str(),
                    after_ms: duration_millis(timeout),
                })
            }
        };
        metrics::record_latency(tier.as_str(), operation, start.elapsed());

        result.map_err(|e| {
            self.stats.tier(tier).error();
            metrics::record_operation(tier.as_str(), operation, "error");
            warn!(tier = %tier, operation, error = %e, "Tier call failed, degrading");
            CacheError::tier(tier.as_str(), &e)
        })
    }

    /// Current mutation epoch. Read it before consulting a slower tier and
    /// compare under the entry's write locks before promoting the result.
    pub(super) fn mutation_epoch(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Call while still holding the write locks of the mutated entry.
    pub(super) fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    /// Lock keys for `locator` plus the sibling access path of whatever
    /// local entry it currently reaches.
    pub(super) fn lock_keys(&self, locator: &Locator) -> Vec<String> {
        let mut keys = locator.lock_keys();
        if let Some(local) = &self.local {
            let now = now_millis();
            let local = local.lock();
            let parts = [
                locator.key().map(|k| Locator::Key(k.to_string())),
                locator.alias().map(Locator::Alias),
            ];
            for part in parts.iter().flatten() {
                if let Some(entry) = local.peek(part, now) {
                    keys.extend(entry.locator().lock_keys());
                }
            }
        }
        keys.sort();
        keys.dedup();
        keys
    }

    // ---------------------------------------------------------------------
    // Local tier bookkeeping
    // ---------------------------------------------------------------------

    /// Insert into L1 with statistics, eviction handling and write-back.
    /// Returns the value it displaced on the same key/alias, if still live.
    pub(super) fn local_insert(&self, entry: CacheEntry<V>) -> Option<CacheEntry<V>> {
        let local = self.local.as_ref()?;
        let now = now_millis();
        self.stats.entry_added(&entry);

        let (outcome, len) = {
            let mut tier = local.lock();
            let outcome = tier.insert(entry, now);
            (outcome, tier.len())
        };
        metrics::set_local_entries(len);

        if let Some(evicted) = outcome.evicted {
            self.stats.entry_removed(&evicted);
            self.stats.eviction();
            metrics::record_eviction(1);
            debug!(locator = %evicted.locator(), "Local tier evicted entry");
            self.dispatch_write_back(&evicted);
        }

        let mut previous = None;
        for old in outcome.replaced {
            self.stats.entry_removed(&old);
            if previous.is_none() && !old.is_expired_at(now) {
                previous = Some(old);
            }
        }
        previous
    }

    /// Cascading L1 removal with statistics.
    pub(super) fn local_remove(&self, locator: &Locator) -> Option<CacheEntry<V>> {
        let local = self.local.as_ref()?;
        let (removed, len) = {
            let mut tier = local.lock();
            let removed = tier.remove(locator);
            (removed, tier.len())
        };
        let removed = removed?;
        self.stats.entry_removed(&removed);
        metrics::set_local_entries(len);
        Some(removed)
    }

    fn dispatch_write_back(&self, evicted: &CacheEntry<V>) {
        if !self.config.write_through || evicted.is_expired() {
            return;
        }
        let record = match evicted.encode() {
            Ok(r) => r,
            Err(e) => {
                warn!(locator = %evicted.locator(), error = %e, "Cannot encode evicted entry for write-back");
                return;
            }
        };
        if let Some(wb) = self.write_back.lock().as_ref() {
            wb.offer(record);
        }
    }

    /// Cancel pending write-backs sharing a key or alias with `locator`.
    pub(super) fn cancel_write_back(&self, locator: &Locator) {
        if let Some(wb) = self.write_back.lock().as_ref() {
            wb.cancel(locator);
        }
    }
}
