//! Hierarchical search and pattern invalidation.
//!
//! ```text
//! search(params)
//!       │
//!       ├─→ L1 pattern index (subset match)
//!       │        └─→ any live hit? return them
//!       │
//!       └─→ slower tiers in fallback order
//!                └─→ first tier with results wins, promoted into faster tiers
//!                    once the pattern lock is released
//! ```
//!
//! Results are never merged across tiers.

use std::collections::BTreeMap;
use std::future::Future;

use tracing::{debug, warn};

use super::api::Promotion;
use super::{CacheValue, HierarchicalCache};
use crate::config::Tier;
use crate::entry::{now_millis, CacheEntry, Locator, StoredEntry};
use crate::error::Result;
use crate::metrics;
use crate::options::CallOptions;
use crate::parameter::{canonicalize, join_pattern, SearchParameter};

/// Lock key for a pattern operation.
fn pattern_lock_key(parameters: &[SearchParameter]) -> String {
    format!("p:{}", join_pattern(parameters))
}

impl<V: CacheValue> HierarchicalCache<V> {
    /// Values of every entry whose parameter set contains all of
    /// `parameters`, gaps allowed. Ordered by identity. An empty query
    /// matches nothing.
    #[tracing::instrument(skip_all, fields(pattern))]
    pub async fn search(&self, parameters: &[SearchParameter], options: &CallOptions) -> Vec<V> {
        let query = canonicalize(parameters);
        if query.is_empty() {
            return Vec::new();
        }
        let lock_key = pattern_lock_key(&query);
        tracing::Span::current().record("pattern", lock_key.as_str());
        self.stats.request();

        let epoch = self.mutation_epoch();
        let (found, promotions) = {
            let _guard = self.locks.read(&[lock_key.as_str()]).await;
            self.search_locked(&query, options).await
        };

        if found.is_empty() {
            self.stats.miss();
            metrics::record_request("search", "miss");
        } else {
            self.stats.hit();
            metrics::record_request("search", "hit");
        }
        self.promote(promotions, epoch, options).await;
        found.into_iter().map(|e| e.value).collect()
    }

    /// Value of the entry stored under `key`, provided its parameter set
    /// contains all of `parameters`. With no parameters this is a plain
    /// [`get`](Self::get) by key.
    #[tracing::instrument(skip_all, fields(key))]
    pub async fn search_key(&self, key: &str, parameters: &[SearchParameter], options: &CallOptions) -> Option<V> {
        let query = canonicalize(parameters);
        let locator = Locator::Key(key.to_string());
        self.stats.request();

        let epoch = self.mutation_epoch();
        let found = {
            let keys = self.lock_keys(&locator);
            let _guard = self.locks.read(&keys).await;
            self.lookup_tiers(&locator, options).await
        };

        match found.filter(|(entry, _)| query.iter().all(|p| entry.parameters().contains(p))) {
            Some((entry, promotion)) => {
                self.stats.hit();
                metrics::record_request("search_key", "hit");
                self.promote(promotion.into_iter().collect(), epoch, options).await;
                Some(entry.value)
            }
            None => {
                self.stats.miss();
                metrics::record_request("search_key", "miss");
                None
            }
        }
    }

    /// Search, or compute and store on a miss.
    ///
    /// `supplier` runs outside any lock when nothing matches. Each value it
    /// returns is stored under its locator with `parameters` as the search
    /// parameters. An empty query matches nothing and computes nothing.
    pub async fn search_or_compute<F, Fut>(
        &self,
        parameters: &[SearchParameter],
        options: &CallOptions,
        supplier: F,
    ) -> Result<Vec<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Vec<(Locator, V)>>,
    {
        if canonicalize(parameters).is_empty() {
            return Ok(Vec::new());
        }
        let found = self.search(parameters, options).await;
        if !found.is_empty() {
            return Ok(found);
        }

        let computed = supplier().await;
        let mut values = Vec::with_capacity(computed.len());
        for (locator, value) in computed {
            self.put(locator, parameters, value.clone(), options).await?;
            values.push(value);
        }
        Ok(values)
    }

    async fn search_locked(&self, query: &[SearchParameter], options: &CallOptions) -> (Vec<CacheEntry<V>>, Vec<Promotion<V>>) {
        if options.reads_local() {
            if let Some(local) = &self.local {
                let (hits, expired) = local.lock().search(query, now_millis());
                for entry in &expired {
                    self.stats.entry_removed(entry);
                }
                if !hits.is_empty() {
                    self.stats.tier(Tier::Local).hit();
                    metrics::record_operation(Tier::Local.as_str(), "search", "hit");
                    return (sorted(hits), Vec::new());
                }
                self.stats.tier(Tier::Local).miss();
                metrics::record_operation(Tier::Local.as_str(), "search", "miss");
            }
        }

        let timeout = self.timeout_for(options);
        for (tier, store) in self.fallback_tiers(options) {
            let Ok(records) = self.call_tier(tier, "search", timeout, store.search(query)).await else {
                continue;
            };
            let decoded = self.decode_live(tier, records);
            if decoded.is_empty() {
                self.stats.tier(tier).miss();
                metrics::record_operation(tier.as_str(), "search", "miss");
                continue;
            }

            self.stats.tier(tier).hit();
            metrics::record_operation(tier.as_str(), "search", "hit");
            debug!(tier = %tier, results = decoded.len(), "Search answered by slower tier");

            let mut entries = Vec::with_capacity(decoded.len());
            let mut promotions = Vec::with_capacity(decoded.len());
            for (record, entry) in decoded {
                promotions.push(Promotion {
                    tier,
                    record,
                    entry: entry.clone(),
                });
                entries.push(entry);
            }
            return (sorted(entries), promotions);
        }
        (Vec::new(), Vec::new())
    }

    /// Drop expired records and anything that does not decode as `V`.
    fn decode_live(&self, tier: Tier, records: Vec<StoredEntry>) -> Vec<(StoredEntry, CacheEntry<V>)> {
        let now = now_millis();
        records
            .into_iter()
            .filter(|r| !r.is_expired_at(now))
            .filter_map(|record| match record.clone().decode::<V>() {
                Ok(entry) => Some((record, entry)),
                Err(e) => {
                    self.stats.tier(tier).error();
                    warn!(tier = %tier, identity = record.identity(), error = %e, "Undecodable record in search results");
                    None
                }
            })
            .collect()
    }

    /// Invalidate every entry whose parameter set contains all of
    /// `parameters`, on every tier. Returns the number of distinct entries
    /// found (local and slower tiers combined).
    #[tracing::instrument(skip_all, fields(pattern))]
    pub async fn invalidate_by_pattern(&self, parameters: &[SearchParameter], options: &CallOptions) -> usize {
        let query = canonicalize(parameters);
        if query.is_empty() {
            return 0;
        }
        let lock_key = pattern_lock_key(&query);
        tracing::Span::current().record("pattern", lock_key.as_str());

        // Collect first, then lock the pattern and every matched identity at
        // once so the stripes are taken in one ordered pass.
        let timeout = self.timeout_for(options);
        let mut targets: BTreeMap<String, Locator> = BTreeMap::new();
        if let Some(local) = &self.local {
            let local = local.lock();
            for id in local.matching(&query) {
                if let Some(entry) = local.entry(&id) {
                    targets.insert(id, entry.locator());
                }
            }
        }
        for (tier, store) in self.enabled_tiers() {
            if let Ok(records) = self.call_tier(tier, "search", timeout, store.search(&query)).await {
                for record in records {
                    targets.insert(record.identity().to_string(), record.locator());
                }
            }
        }

        let mut keys = vec![lock_key];
        for locator in targets.values() {
            keys.extend(self.lock_keys(locator));
        }
        keys.sort();
        keys.dedup();
        let _guard = self.locks.write(&keys).await;

        // anything indexed locally since the collection pass goes too
        let late: Vec<String> = match &self.local {
            Some(local) => local.lock().matching(&query),
            None => Vec::new(),
        };
        for id in late {
            let removed = self.local.as_ref().and_then(|l| l.lock().remove_identity(&id));
            if let Some(entry) = removed {
                self.stats.entry_removed(&entry);
                targets.entry(id).or_insert_with(|| entry.locator());
            }
        }

        for locator in targets.values() {
            self.cancel_write_back(locator);
            self.local_remove(locator);
            for (tier, store) in self.enabled_tiers() {
                let _ = self.call_tier(tier, "invalidate", timeout, store.invalidate(locator)).await;
            }
        }

        if let Some(local) = &self.local {
            metrics::set_local_entries(local.lock().len());
        }
        self.record_mutation();
        debug!(count = targets.len(), "Pattern invalidation complete");
        targets.len()
    }
}

fn sorted<V>(mut entries: Vec<CacheEntry<V>>) -> Vec<CacheEntry<V>> {
    entries.sort_by(|a, b| a.identity().cmp(b.identity()));
    entries
}

