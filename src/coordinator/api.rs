//! Point operations: get, put and their conditional variants.

use std::future::Future;

use tracing::{debug, warn};

use super::{CacheValue, HierarchicalCache};
use crate::config::Tier;
use crate::entry::{now_millis, CacheEntry, Locator, StoredEntry};
use crate::error::Result;
use crate::metrics;
use crate::options::CallOptions;
use crate::parameter::SearchParameter;
use crate::storage::local::LocalRead;

/// A slower-tier hit waiting to be copied into the faster tiers.
pub(super) struct Promotion<V> {
    pub(super) tier: Tier,
    pub(super) record: StoredEntry,
    pub(super) entry: CacheEntry<V>,
}

impl<V: CacheValue> HierarchicalCache<V> {
    /// Get a value by key, alias, or key+alias.
    ///
    /// Local tier first (unless `skip_local`/`force_refresh`), then the
    /// slower tiers in fallback order. A miss everywhere is `None`, never an
    /// error.
    #[tracing::instrument(skip_all, fields(locator))]
    pub async fn get(&self, locator: impl Into<Locator>, options: &CallOptions) -> Option<V> {
        let locator = locator.into();
        tracing::Span::current().record("locator", tracing::field::display(&locator));
        self.stats.request();

        let epoch = self.mutation_epoch();
        let found = {
            let keys = self.lock_keys(&locator);
            let _guard = self.locks.read(&keys).await;
            self.lookup_tiers(&locator, options).await
        };

        match found {
            Some((entry, promotion)) => {
                self.stats.hit();
                metrics::record_request("get", "hit");
                self.promote(promotion.into_iter().collect(), epoch, options).await;
                Some(entry.value)
            }
            None => {
                self.stats.miss();
                metrics::record_request("get", "miss");
                debug!("Miss on every tier");
                None
            }
        }
    }

    /// Is a live entry reachable through `locator` on any tier?
    /// Does not populate faster tiers.
    pub async fn contains(&self, locator: impl Into<Locator>, options: &CallOptions) -> bool {
        let locator = locator.into();
        let keys = self.lock_keys(&locator);
        let _guard = self.locks.read(&keys).await;
        self.lookup_locked(&locator, options).await.is_some()
    }

    /// Store `value` under the key and/or alias of `locator`.
    ///
    /// Any entry already reachable through the same key or alias is replaced
    /// and its value returned (as seen by the local tier). The TTL comes
    /// from `options.ttl`, falling back to `default_ttl_ms`.
    pub async fn put(
        &self,
        locator: impl Into<Locator>,
        parameters: &[SearchParameter],
        value: V,
        options: &CallOptions,
    ) -> Result<Option<V>> {
        let entry = self.build_entry(locator.into(), parameters, value, options)?;
        self.put_entry(entry, options).await
    }

    /// Store a prebuilt entry.
    #[tracing::instrument(skip_all, fields(locator))]
    pub async fn put_entry(&self, entry: CacheEntry<V>, options: &CallOptions) -> Result<Option<V>> {
        let locator = entry.locator();
        tracing::Span::current().record("locator", tracing::field::display(&locator));

        let keys = self.lock_keys(&locator);
        let _guard = self.locks.write(&keys).await;
        Ok(self.store_locked(entry, options).await.map(|e| e.value))
    }

    /// Store only if nothing live is reachable through the key or alias.
    /// Returns the existing value when there is one (and writes nothing).
    pub async fn put_if_absent(
        &self,
        locator: impl Into<Locator>,
        parameters: &[SearchParameter],
        value: V,
        options: &CallOptions,
    ) -> Result<Option<V>> {
        let entry = self.build_entry(locator.into(), parameters, value, options)?;
        let keys = self.lock_keys(&entry.locator());
        let _guard = self.locks.write(&keys).await;

        if let Some(existing) = self.find_existing(&entry, options).await {
            return Ok(Some(existing.value));
        }
        self.store_locked(entry, options).await;
        Ok(None)
    }

    /// Store only if something live is reachable through the key or alias.
    /// Returns the replaced value, or `None` (and writes nothing).
    pub async fn replace(
        &self,
        locator: impl Into<Locator>,
        parameters: &[SearchParameter],
        value: V,
        options: &CallOptions,
    ) -> Result<Option<V>> {
        let entry = self.build_entry(locator.into(), parameters, value, options)?;
        let keys = self.lock_keys(&entry.locator());
        let _guard = self.locks.write(&keys).await;

        let Some(existing) = self.find_existing(&entry, options).await else {
            return Ok(None);
        };
        self.store_locked(entry, options).await;
        Ok(Some(existing.value))
    }

    /// Get, or compute and store on a miss.
    ///
    /// `supplier` runs at most once per call, outside any lock, and may be
    /// invoked by several concurrent callers missing the same key. A `None`
    /// from it stores nothing. The computed value is stored without search
    /// parameters.
    pub async fn get_or_compute<F, Fut>(&self, locator: impl Into<Locator>, options: &CallOptions, supplier: F) -> Result<Option<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        let locator = locator.into();
        if let Some(value) = self.get(locator.clone(), options).await {
            return Ok(Some(value));
        }
        let Some(value) = supplier().await else {
            return Ok(None);
        };
        self.put(locator, &[], value.clone(), options).await?;
        Ok(Some(value))
    }

    // ---------------------------------------------------------------------
    // Internals (caller holds the locks)
    // ---------------------------------------------------------------------

    fn build_entry(&self, locator: Locator, parameters: &[SearchParameter], value: V, options: &CallOptions) -> Result<CacheEntry<V>> {
        let ttl = options.ttl.or_else(|| self.config.default_ttl());
        CacheEntry::new(locator.key().map(String::from), locator.alias(), parameters, value, ttl)
    }

    /// Live entry reachable through either access path of `entry`.
    async fn find_existing(&self, entry: &CacheEntry<V>, options: &CallOptions) -> Option<CacheEntry<V>> {
        if let Some(key) = entry.key() {
            if let Some(found) = self.lookup_locked(&Locator::Key(key.to_string()), options).await {
                return Some(found);
            }
        }
        match entry.alias() {
            Some(alias) => self.lookup_locked(&Locator::Alias(alias), options).await,
            None => None,
        }
    }

    pub(super) async fn lookup_locked(&self, locator: &Locator, options: &CallOptions) -> Option<CacheEntry<V>> {
        self.lookup_tiers(locator, options).await.map(|(entry, _)| entry)
    }

    /// Read path. A slower-tier hit comes back with the [`Promotion`] that
    /// would copy it into the faster tiers.
    pub(super) async fn lookup_tiers(&self, locator: &Locator, options: &CallOptions) -> Option<(CacheEntry<V>, Option<Promotion<V>>)> {
        if options.reads_local() {
            if let Some(local) = &self.local {
                let read = local.lock().get(locator, now_millis());
                match read {
                    LocalRead::Hit(entry) => {
                        self.stats.tier(Tier::Local).hit();
                        metrics::record_operation(Tier::Local.as_str(), "get", "hit");
                        return Some((entry, None));
                    }
                    LocalRead::Expired(entry) => {
                        self.stats.entry_removed(&entry);
                        self.stats.tier(Tier::Local).miss();
                        debug!(locator = %locator, "Local entry expired");
                    }
                    LocalRead::Miss => {
                        self.stats.tier(Tier::Local).miss();
                        metrics::record_operation(Tier::Local.as_str(), "get", "miss");
                    }
                }
            }
        }

        let timeout = self.timeout_for(options);
        for (tier, store) in self.fallback_tiers(options) {
            let record = match self.call_tier(tier, "get", timeout, store.get(locator)).await {
                Ok(Some(record)) if !record.is_expired() => record,
                Ok(_) => {
                    self.stats.tier(tier).miss();
                    metrics::record_operation(tier.as_str(), "get", "miss");
                    continue;
                }
                Err(_) => continue,
            };

            let entry = match record.clone().decode::<V>() {
                Ok(entry) => entry,
                Err(e) => {
                    self.stats.tier(tier).error();
                    warn!(tier = %tier, locator = %locator, error = %e, "Undecodable record, skipping tier");
                    continue;
                }
            };

            self.stats.tier(tier).hit();
            metrics::record_operation(tier.as_str(), "get", "hit");
            debug!(tier = %tier, locator = %locator, "Slower tier hit");
            let promotion = Promotion {
                tier,
                record,
                entry: entry.clone(),
            };
            return Some((entry, Some(promotion)));
        }
        None
    }

    /// Copy slower-tier hits into the faster tiers.
    ///
    /// Call after releasing the read locks. Each hit is written under the
    /// write locks of its own key and alias, and skipped when any mutation
    /// landed after `epoch` was read: the record may predate an
    /// invalidation that must stay visible.
    pub(super) async fn promote(&self, promotions: Vec<Promotion<V>>, epoch: u64, options: &CallOptions) {
        if !self.config.read_through {
            return;
        }
        for Promotion { tier, record, entry } in promotions {
            let to_remote = tier == Tier::Persistent && self.remote.is_some();
            if !to_remote && !options.writes_local() {
                continue;
            }

            let locator = record.locator();
            let keys = self.lock_keys(&locator);
            let _guard = self.locks.write(&keys).await;
            if self.mutation_epoch() != epoch {
                metrics::record_operation(tier.as_str(), "read_through", "skipped");
                debug!(locator = %locator, "Cache mutated since the slower-tier read, not promoting");
                return;
            }

            if to_remote {
                if let Some(remote) = &self.remote {
                    let timeout = self.timeout_for(options);
                    if self.call_tier(Tier::Remote, "put", timeout, remote.put(&record)).await.is_ok() {
                        self.stats.tier(Tier::Remote).put();
                        metrics::record_operation(Tier::Remote.as_str(), "put", "success");
                    }
                }
            }
            if options.writes_local() {
                self.local_insert(entry);
            }
        }
    }

    /// Write path shared by put/put_if_absent/replace/link.
    /// Returns the entry displaced in the local tier.
    pub(super) async fn store_locked(&self, entry: CacheEntry<V>, options: &CallOptions) -> Option<CacheEntry<V>> {
        self.cancel_write_back(&entry.locator());

        let previous = if self.local.is_some() && options.writes_local() {
            self.stats.tier(Tier::Local).put();
            metrics::record_operation(Tier::Local.as_str(), "put", "success");
            self.local_insert(entry.clone())
        } else {
            // the local copy would go stale, drop it
            let by_key = entry.key().and_then(|k| self.local_remove(&Locator::Key(k.to_string())));
            let by_alias = entry.alias().and_then(|a| self.local_remove(&Locator::Alias(a)));
            by_key.or(by_alias)
        };

        if self.config.write_through {
            self.write_through(&entry, options).await;
        }
        self.record_mutation();
        previous
    }

    /// Propagate to every active slower tier; each one independently.
    pub(super) async fn write_through(&self, entry: &CacheEntry<V>, options: &CallOptions) {
        let tiers = self.enabled_tiers();
        if tiers.is_empty() {
            return;
        }
        let record = match entry.encode() {
            Ok(r) => r,
            Err(e) => {
                for (tier, _) in &tiers {
                    self.stats.tier(*tier).error();
                }
                warn!(locator = %entry.locator(), error = %e, "Value not serializable, kept local only");
                return;
            }
        };

        let timeout = self.timeout_for(options);
        for (tier, store) in tiers {
            if self.call_tier(tier, "put", timeout, store.put(&record)).await.is_ok() {
                self.stats.tier(tier).put();
                metrics::record_operation(tier.as_str(), "put", "success");
            }
        }
    }
}

impl<V: CacheValue + PartialEq> HierarchicalCache<V> {
    /// Compare-and-replace: store `value` only if the live entry reachable
    /// through the key or alias currently holds `expected`. Returns whether
    /// the replacement happened.
    pub async fn replace_if(
        &self,
        locator: impl Into<Locator>,
        parameters: &[SearchParameter],
        expected: &V,
        value: V,
        options: &CallOptions,
    ) -> Result<bool> {
        let entry = self.build_entry(locator.into(), parameters, value, options)?;
        let keys = self.lock_keys(&entry.locator());
        let _guard = self.locks.write(&keys).await;

        match self.find_existing(&entry, options).await {
            Some(existing) if existing.value == *expected => {
                self.store_locked(entry, options).await;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
