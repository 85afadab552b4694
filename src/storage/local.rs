// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! L1: bounded in-process tier.
//!
//! An LRU of entries keyed by identity, plus the key → identity,
//! alias → identity and pattern indexes. All four structures are mutated
//! together by every method, so the owner only needs one lock around the
//! whole tier.
//!
//! Expiry is lazy: an entry is checked on access against both its own TTL
//! and the tier's residency cap (`local_ttl`), whichever is shorter.
//! [`LocalTier::purge_expired`] sweeps explicitly.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;

use crate::entry::{duration_millis, CacheEntry, Locator};
use crate::parameter::SearchParameter;
use crate::search::PatternIndex;

struct Slot<V> {
    entry: CacheEntry<V>,
    /// When this tier took the entry (epoch millis)
    cached_at: u64,
}

/// Outcome of [`LocalTier::get`].
#[derive(Debug)]
pub enum LocalRead<V> {
    Hit(CacheEntry<V>),
    /// The entry was found but had expired; it has been removed.
    Expired(CacheEntry<V>),
    Miss,
}

/// What an insert displaced.
#[derive(Debug)]
pub struct LocalInsert<V> {
    /// Entries retired because they shared the identity, key or alias.
    pub replaced: Vec<CacheEntry<V>>,
    /// Entry pushed out by the capacity bound.
    pub evicted: Option<CacheEntry<V>>,
}

pub struct LocalTier<V> {
    entries: LruCache<String, Slot<V>>,
    by_key: HashMap<String, String>,
    by_alias: HashMap<i64, String>,
    patterns: PatternIndex,
    residency_ms: u64,
}

impl<V: Clone> LocalTier<V> {
    /// `max_entries` of zero is treated as one. `residency` of zero means
    /// entries stay until their own TTL or eviction.
    #[must_use]
    pub fn new(max_entries: usize, residency: Duration) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(cap),
            by_key: HashMap::new(),
            by_alias: HashMap::new(),
            patterns: PatternIndex::new(),
            residency_ms: duration_millis(residency),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    fn slot_expired(&self, slot: &Slot<V>, now: u64) -> bool {
        slot.entry.is_expired_at(now)
            || (self.residency_ms > 0 && now.saturating_sub(slot.cached_at) > self.residency_ms)
    }

    /// Identity addressed by `locator`, if any entry answers to it.
    #[must_use]
    pub fn resolve(&self, locator: &Locator) -> Option<String> {
        let id = match locator {
            Locator::Key(k) => self.by_key.get(k)?,
            Locator::Alias(a) => self.by_alias.get(a)?,
            Locator::KeyAlias { key, .. } => self.by_key.get(key)?,
        };
        let slot = self.entries.peek(id)?;
        slot.entry.matches(locator).then(|| id.clone())
    }

    /// Insert `entry`, retiring anything that shares its identity, key or
    /// alias first.
    pub fn insert(&mut self, entry: CacheEntry<V>, now: u64) -> LocalInsert<V> {
        let mut replaced = Vec::new();
        if let Some(old) = self.remove_identity(entry.identity()) {
            replaced.push(old);
        }
        if let Some(key) = entry.key() {
            if let Some(old) = self.remove(&Locator::Key(key.to_string())) {
                replaced.push(old);
            }
        }
        if let Some(alias) = entry.alias() {
            if let Some(old) = self.remove(&Locator::Alias(alias)) {
                replaced.push(old);
            }
        }

        let identity = entry.identity().to_string();
        if let Some(key) = entry.key() {
            self.by_key.insert(key.to_string(), identity.clone());
        }
        if let Some(alias) = entry.alias() {
            self.by_alias.insert(alias, identity.clone());
        }
        self.patterns.register(&identity, entry.parameters());

        let evicted = self
            .entries
            .push(identity.clone(), Slot { entry, cached_at: now })
            .and_then(|(evicted_id, slot)| {
                if evicted_id == identity {
                    // same identity was removed above, cannot happen
                    return None;
                }
                self.unlink(&slot.entry);
                Some(slot.entry)
            });

        LocalInsert { replaced, evicted }
    }

    /// Look up and promote. Expired entries are removed and reported.
    pub fn get(&mut self, locator: &Locator, now: u64) -> LocalRead<V> {
        let Some(id) = self.resolve(locator) else {
            return LocalRead::Miss;
        };
        let expired = match self.entries.peek(&id) {
            Some(slot) => self.slot_expired(slot, now),
            None => return LocalRead::Miss,
        };
        if expired {
            return match self.remove_identity(&id) {
                Some(entry) => LocalRead::Expired(entry),
                None => LocalRead::Miss,
            };
        }
        match self.entries.get(&id) {
            Some(slot) => LocalRead::Hit(slot.entry.clone()),
            None => LocalRead::Miss,
        }
    }

    /// Look up without promoting or removing. Expired entries read as absent.
    #[must_use]
    pub fn peek(&self, locator: &Locator, now: u64) -> Option<&CacheEntry<V>> {
        let id = self.resolve(locator)?;
        let slot = self.entries.peek(&id)?;
        (!self.slot_expired(slot, now)).then_some(&slot.entry)
    }

    /// Entry stored under `identity`, expired or not. No promotion.
    #[must_use]
    pub fn entry(&self, identity: &str) -> Option<&CacheEntry<V>> {
        self.entries.peek(identity).map(|slot| &slot.entry)
    }

    /// Entries whose parameters contain all of `parameters`. Returns the
    /// live hits (promoted) and the expired ones (removed).
    pub fn search(&mut self, parameters: &[SearchParameter], now: u64) -> (Vec<CacheEntry<V>>, Vec<CacheEntry<V>>) {
        let mut hits = Vec::new();
        let mut expired = Vec::new();
        for id in self.patterns.search(parameters) {
            let is_expired = match self.entries.peek(&id) {
                Some(slot) => self.slot_expired(slot, now),
                None => continue,
            };
            if is_expired {
                if let Some(entry) = self.remove_identity(&id) {
                    expired.push(entry);
                }
            } else if let Some(slot) = self.entries.get(&id) {
                hits.push(slot.entry.clone());
            }
        }
        (hits, expired)
    }

    /// Identities matching `parameters`, without touching recency.
    #[must_use]
    pub fn matching(&self, parameters: &[SearchParameter]) -> Vec<String> {
        self.patterns.search(parameters)
    }

    /// Cascading removal of whatever entry `locator` addresses.
    pub fn remove(&mut self, locator: &Locator) -> Option<CacheEntry<V>> {
        let id = self.resolve(locator)?;
        self.remove_identity(&id)
    }

    /// Cascading removal by identity.
    pub fn remove_identity(&mut self, identity: &str) -> Option<CacheEntry<V>> {
        let slot = self.entries.pop(identity)?;
        self.unlink(&slot.entry);
        Some(slot.entry)
    }

    /// Drop the secondary-index references of an entry already out of the LRU.
    fn unlink(&mut self, entry: &CacheEntry<V>) {
        if let Some(key) = entry.key() {
            if self.by_key.get(key).map(String::as_str) == Some(entry.identity()) {
                self.by_key.remove(key);
            }
        }
        if let Some(alias) = entry.alias() {
            if self.by_alias.get(&alias).map(String::as_str) == Some(entry.identity()) {
                self.by_alias.remove(&alias);
            }
        }
        self.patterns.unregister(entry.identity());
    }

    /// Remove every expired entry.
    pub fn purge_expired(&mut self, now: u64) -> Vec<CacheEntry<V>> {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, slot)| self.slot_expired(slot, now))
            .map(|(id, _)| id.clone())
            .collect();
        stale.iter().filter_map(|id| self.remove_identity(id)).collect()
    }

    /// Drop everything. Returns the removed entries.
    pub fn clear(&mut self) -> Vec<CacheEntry<V>> {
        let mut removed = Vec::with_capacity(self.entries.len());
        while let Some((_, slot)) = self.entries.pop_lru() {
            removed.push(slot.entry);
        }
        self.by_key.clear();
        self.by_alias.clear();
        self.patterns.clear();
        removed
    }

    /// Number of distinct patterns currently indexed.
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.patterns.pattern_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(name: &str, value: &str, level: u32) -> SearchParameter {
        SearchParameter::new(name, value, level).unwrap()
    }

    fn entry(key: &str, alias: Option<i64>, params: &[SearchParameter], value: u32) -> CacheEntry<u32> {
        CacheEntry::new(Some(key.to_string()), alias, params, value, None).unwrap()
    }

    fn tier(cap: usize) -> LocalTier<u32> {
        LocalTier::new(cap, Duration::ZERO)
    }

    #[test]
    fn test_insert_and_get_by_every_path() {
        let mut local = tier(10);
        local.insert(entry("A", Some(7), &[p("region", "emea", 0)], 1), 0);

        assert!(matches!(local.get(&"A".into(), 0), LocalRead::Hit(e) if e.value == 1));
        assert!(matches!(local.get(&Locator::Alias(7), 0), LocalRead::Hit(e) if e.value == 1));
        assert!(matches!(local.get(&Locator::from(("A", 7i64)), 0), LocalRead::Hit(_)));
        assert!(matches!(local.get(&Locator::from(("A", 8i64)), 0), LocalRead::Miss));
        assert!(matches!(local.get(&"B".into(), 0), LocalRead::Miss));
    }

    #[test]
    fn test_insert_replaces_by_key() {
        let mut local = tier(10);
        local.insert(entry("A", None, &[p("region", "emea", 0)], 1), 0);
        let outcome = local.insert(entry("A", None, &[p("region", "apac", 0)], 2), 0);

        assert_eq!(outcome.replaced.len(), 1);
        assert_eq!(outcome.replaced[0].value, 1);
        assert_eq!(local.len(), 1);
        // old patterns are gone
        assert!(local.matching(&[p("region", "emea", 0)]).is_empty());
        assert_eq!(local.matching(&[p("region", "apac", 0)]).len(), 1);
    }

    #[test]
    fn test_insert_replaces_by_alias() {
        let mut local = tier(10);
        local.insert(entry("A", Some(7), &[], 1), 0);
        let outcome = local.insert(entry("B", Some(7), &[], 2), 0);

        assert_eq!(outcome.replaced.len(), 1);
        assert!(matches!(local.get(&"A".into(), 0), LocalRead::Miss));
        assert!(matches!(local.get(&Locator::Alias(7), 0), LocalRead::Hit(e) if e.value == 2));
    }

    #[test]
    fn test_lru_eviction_cleans_indexes() {
        let mut local = tier(2);
        local.insert(entry("A", Some(1), &[p("region", "emea", 0)], 1), 0);
        local.insert(entry("B", Some(2), &[p("region", "emea", 0)], 2), 0);
        // touch A so B is least recently used
        assert!(matches!(local.get(&"A".into(), 0), LocalRead::Hit(_)));

        let outcome = local.insert(entry("C", None, &[], 3), 0);
        let evicted = outcome.evicted.expect("B should be evicted");
        assert_eq!(evicted.key(), Some("B"));
        assert_eq!(local.len(), 2);
        assert!(local.resolve(&Locator::Alias(2)).is_none());
        assert_eq!(local.matching(&[p("region", "emea", 0)]).len(), 1);
    }

    #[test]
    fn test_entry_ttl_is_lazy() {
        let mut local = tier(10);
        let mut e = CacheEntry::new(Some("A".into()), Some(7), &[p("region", "emea", 0)], 1u32, Some(Duration::from_millis(50))).unwrap();
        e.created_at = 1_000;
        local.insert(e, 1_000);

        assert!(matches!(local.get(&"A".into(), 1_040), LocalRead::Hit(_)));
        assert!(matches!(local.get(&Locator::Alias(7), 1_100), LocalRead::Expired(_)));
        assert!(local.is_empty());
        assert_eq!(local.pattern_count(), 0);
        assert!(matches!(local.get(&"A".into(), 1_100), LocalRead::Miss));
    }

    #[test]
    fn test_residency_cap() {
        let mut local: LocalTier<u32> = LocalTier::new(10, Duration::from_millis(100));
        local.insert(entry("A", None, &[], 1), 5_000);
        assert!(local.peek(&"A".into(), 5_100).is_some());
        assert!(local.peek(&"A".into(), 5_101).is_none());
        assert!(matches!(local.get(&"A".into(), 5_101), LocalRead::Expired(_)));
    }

    #[test]
    fn test_search_drops_expired() {
        let mut local = tier(10);
        let shared = [p("region", "emea", 0)];
        let mut short = CacheEntry::new(Some("A".into()), None, &shared, 1u32, Some(Duration::from_millis(10))).unwrap();
        short.created_at = 0;
        local.insert(short, 0);
        local.insert(entry("B", None, &shared, 2), 0);

        let (hits, expired) = local.search(&shared, 1_000);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].value, 2);
        assert_eq!(expired.len(), 1);
        assert_eq!(local.len(), 1);
    }

    #[test]
    fn test_remove_cascades_both_paths() {
        let mut local = tier(10);
        local.insert(entry("A", Some(7), &[p("region", "emea", 0)], 1), 0);

        let removed = local.remove(&"A".into()).unwrap();
        assert_eq!(removed.value, 1);
        assert!(local.resolve(&Locator::Alias(7)).is_none());
        assert_eq!(local.pattern_count(), 0);
        assert!(local.remove(&"A".into()).is_none());
    }

    #[test]
    fn test_purge_and_clear() {
        let mut local = tier(10);
        let mut short = CacheEntry::new(Some("A".into()), None, &[], 1u32, Some(Duration::from_millis(10))).unwrap();
        short.created_at = 0;
        local.insert(short, 0);
        local.insert(entry("B", None, &[p("region", "emea", 0)], 2), 0);

        assert_eq!(local.purge_expired(1_000).len(), 1);
        assert_eq!(local.len(), 1);

        assert_eq!(local.clear().len(), 1);
        assert!(local.is_empty());
        assert_eq!(local.pattern_count(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let local: LocalTier<u32> = LocalTier::new(0, Duration::ZERO);
        assert_eq!(local.capacity(), 1);
    }
}
