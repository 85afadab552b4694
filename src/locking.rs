// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Striped lock table.
//!
//! Lock keys (`k:{key}`, `a:{alias}`, `p:{pattern}`) hash onto a fixed set
//! of async read-write stripes. Two keys sharing a stripe only costs
//! throughput. Every guard also holds the global lock in read mode, so
//! [`LockTable::exclusive`] (used by `invalidate_all`) waits for all
//! in-flight operations and blocks new ones.
//!
//! Multi-key acquisitions always take stripes in ascending index order,
//! which is a total order, so two callers locking the same pair in opposite
//! roles can never deadlock.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct LockTable {
    global: RwLock<()>,
    stripes: Vec<RwLock<()>>,
}

/// Shared access to one or more stripes.
pub struct ReadGuard<'a> {
    _stripes: Vec<RwLockReadGuard<'a, ()>>,
    _global: RwLockReadGuard<'a, ()>,
}

/// Exclusive access to one or more stripes.
pub struct WriteGuard<'a> {
    _stripes: Vec<RwLockWriteGuard<'a, ()>>,
    _global: RwLockReadGuard<'a, ()>,
}

impl LockTable {
    /// A table of `stripes` locks (at least one).
    #[must_use]
    pub fn new(stripes: usize) -> Self {
        let count = stripes.max(1);
        Self {
            global: RwLock::new(()),
            stripes: (0..count).map(|_| RwLock::new(())).collect(),
        }
    }

    #[must_use]
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    #[must_use]
    pub fn stripe_of(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Distinct stripe indexes for `keys`, ascending.
    fn ordered<S: AsRef<str>>(&self, keys: &[S]) -> Vec<usize> {
        let mut idx: Vec<usize> = keys.iter().map(|k| self.stripe_of(k.as_ref())).collect();
        idx.sort_unstable();
        idx.dedup();
        idx
    }

    pub async fn read<S: AsRef<str>>(&self, keys: &[S]) -> ReadGuard<'_> {
        let global = self.global.read().await;
        let mut stripes = Vec::with_capacity(keys.len());
        for i in self.ordered(keys) {
            stripes.push(self.stripes[i].read().await);
        }
        ReadGuard { _stripes: stripes, _global: global }
    }

    pub async fn write<S: AsRef<str>>(&self, keys: &[S]) -> WriteGuard<'_> {
        let global = self.global.read().await;
        let mut stripes = Vec::with_capacity(keys.len());
        for i in self.ordered(keys) {
            stripes.push(self.stripes[i].write().await);
        }
        WriteGuard { _stripes: stripes, _global: global }
    }

    /// Exclude every other operation.
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.global.write().await
    }
}
