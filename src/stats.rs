//! Atomic cache statistics.
//!
//! Counters are updated lock-free and read as a point-in-time
//! [`StatisticsSnapshot`]. They are eventually consistent with the data:
//! no update is ever lost, but a snapshot taken mid-operation may be one
//! step behind.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::config::Tier;
use crate::entry::CacheEntry;

#[derive(Debug, Default)]
pub struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    errors: AtomicU64,
}

impl TierCounters {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.puts.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TierSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        TierSnapshot {
            hits,
            misses,
            puts: self.puts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: ratio(hits, misses),
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheStatistics {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    total_keys: AtomicU64,
    total_values: AtomicU64,
    local: TierCounters,
    remote: TierCounters,
    persistent: TierCounters,
}

impl CacheStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tier(&self, tier: Tier) -> &TierCounters {
        match tier {
            Tier::Local => &self.local,
            Tier::Remote => &self.remote,
            Tier::Persistent => &self.persistent,
        }
    }

    pub fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// An entry became live in the local tier.
    pub fn entry_added<V>(&self, entry: &CacheEntry<V>) {
        self.total_values.fetch_add(1, Ordering::Relaxed);
        self.total_keys.fetch_add(access_paths(entry), Ordering::Relaxed);
    }

    /// An entry left the local tier (replaced, evicted, expired, invalidated).
    pub fn entry_removed<V>(&self, entry: &CacheEntry<V>) {
        saturating_sub(&self.total_values, 1);
        saturating_sub(&self.total_keys, access_paths(entry));
    }

    /// Zero every counter. The live-entry gauges track what the local tier
    /// holds and are left alone.
    pub fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.local.reset();
        self.remote.reset();
        self.persistent.reset();
    }

    /// The local tier was emptied.
    pub fn clear_entries(&self) {
        self.total_keys.store(0, Ordering::Relaxed);
        self.total_values.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        StatisticsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            hits,
            misses,
            hit_rate: ratio(hits, misses),
            evictions: self.evictions.load(Ordering::Relaxed),
            total_keys: self.total_keys.load(Ordering::Relaxed),
            total_values: self.total_values.load(Ordering::Relaxed),
            local: self.local.snapshot(),
            remote: self.remote.snapshot(),
            persistent: self.persistent.snapshot(),
        }
    }
}

fn access_paths<V>(entry: &CacheEntry<V>) -> u64 {
    u64::from(entry.key().is_some()) + u64::from(entry.alias().is_some())
}

fn saturating_sub(counter: &AtomicU64, n: u64) {
    // Err only when the closure returns None, which it never does
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(n)));
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

/// Point-in-time view of [`CacheStatistics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    /// Live key and alias access paths in the local tier
    pub total_keys: u64,
    /// Live entries in the local tier
    pub total_values: u64,
    pub local: TierSnapshot,
    pub remote: TierSnapshot,
    pub persistent: TierSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(key: Option<&str>, alias: Option<i64>) -> CacheEntry<u8> {
        CacheEntry::new(key.map(String::from), alias, &[], 0, None).unwrap()
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStatistics::new();
        assert_eq!(stats.snapshot().hit_rate, 0.0);
        stats.hit();
        stats.hit();
        stats.hit();
        stats.miss();
        assert_eq!(stats.snapshot().hit_rate, 0.75);
    }

    #[test]
    fn test_keys_and_values_track_entries() {
        let stats = CacheStatistics::new();
        let both = entry(Some("A"), Some(1));
        let key_only = entry(Some("B"), None);

        stats.entry_added(&both);
        stats.entry_added(&key_only);
        let snap = stats.snapshot();
        assert_eq!(snap.total_values, 2);
        assert_eq!(snap.total_keys, 3);

        stats.entry_removed(&both);
        stats.entry_removed(&both);
        stats.entry_removed(&key_only);
        let snap = stats.snapshot();
        assert_eq!(snap.total_values, 0);
        assert_eq!(snap.total_keys, 0);
    }

    #[test]
    fn test_tier_counters_and_reset() {
        let stats = CacheStatistics::new();
        stats.tier(Tier::Remote).hit();
        stats.tier(Tier::Remote).miss();
        stats.tier(Tier::Persistent).error();
        stats.eviction();

        let snap = stats.snapshot();
        assert_eq!(snap.remote.hits, 1);
        assert_eq!(snap.remote.hit_rate, 0.5);
        assert_eq!(snap.persistent.errors, 1);
        assert_eq!(snap.evictions, 1);

        stats.reset();
        let snap = stats.snapshot();
        assert_eq!(snap.remote.hits, 0);
        assert_eq!(snap.persistent.errors, 0);
        assert_eq!(snap.evictions, 0);
    }

    #[test]
    fn test_reset_keeps_live_entry_gauges() {
        let stats = CacheStatistics::new();
        let a = entry(Some("A"), Some(1));
        let b = entry(Some("B"), None);
        stats.entry_added(&a);
        stats.entry_added(&b);
        stats.request();

        stats.reset();
        let snap = stats.snapshot();
        assert_eq!(snap.requests, 0);
        assert_eq!(snap.total_values, 2);
        assert_eq!(snap.total_keys, 3);

        stats.entry_removed(&a);
        let snap = stats.snapshot();
        assert_eq!(snap.total_values, 1);
        assert_eq!(snap.total_keys, 1);

        stats.clear_entries();
        assert_eq!(stats.snapshot().total_values, 0);
        assert_eq!(stats.snapshot().total_keys, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(CacheStatistics::new().snapshot()).unwrap();
        assert_eq!(json["local"]["hits"], 0);
        assert!(json.get("hit_rate").is_some());
    }

    #[test]
    fn test_concurrent_increments_not_lost() {
        let stats = Arc::new(CacheStatistics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        s.request();
                        s.tier(Tier::Local).put();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.requests, 8000);
        assert_eq!(snap.local.puts, 8000);
    }
}
