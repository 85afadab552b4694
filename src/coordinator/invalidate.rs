//! Cascading invalidation.
//!
//! Removing an entry through either access path removes the whole entry:
//! key pointer, alias pointer and every pattern it was indexed under, on the
//! local tier and (best-effort) on every slower tier.

use tracing::{debug, info};

use super::{CacheValue, HierarchicalCache};
use crate::entry::{CacheEntry, Locator};
use crate::metrics;
use crate::options::CallOptions;

impl<V: CacheValue> HierarchicalCache<V> {
    /// Remove the entry `locator` reaches from every tier. Invalidating
    /// something absent is a no-op.
    #[tracing::instrument(skip_all, fields(locator))]
    pub async fn invalidate(&self, locator: impl Into<Locator>, options: &CallOptions) {
        let locator = locator.into();
        tracing::Span::current().record("locator", tracing::field::display(&locator));

        let keys = self.lock_keys(&locator);
        let _guard = self.locks.write(&keys).await;
        self.remove_locked(&locator, options, false).await;
    }

    /// Like [`invalidate`](Self::invalidate), returning the value that was
    /// live (looked up on the slower tiers when the local tier has none).
    #[tracing::instrument(skip_all, fields(locator))]
    pub async fn remove(&self, locator: impl Into<Locator>, options: &CallOptions) -> Option<V> {
        let locator = locator.into();
        tracing::Span::current().record("locator", tracing::field::display(&locator));

        let keys = self.lock_keys(&locator);
        let _guard = self.locks.write(&keys).await;
        self.remove_locked(&locator, options, true).await.map(|e| e.value)
    }

    async fn remove_locked(&self, locator: &Locator, options: &CallOptions, want_value: bool) -> Option<CacheEntry<V>> {
        self.cancel_write_back(locator);

        let mut removed = self.local_remove(locator).filter(|e| !e.is_expired());
        if removed.is_none() && want_value {
            let slow = CallOptions {
                skip_local: true,
                ..options.clone()
            };
            removed = self.lookup_locked(locator, &slow).await;
        }

        // the entry may be reachable on slower tiers through its other path
        let mut targets = vec![locator.clone()];
        if let Some(entry) = &removed {
            let full = entry.locator();
            if full != *locator {
                self.cancel_write_back(&full);
                targets.push(full);
            }
        }

        let timeout = self.timeout_for(options);
        for (tier, store) in self.enabled_tiers() {
            for target in &targets {
                let _ = self.call_tier(tier, "invalidate", timeout, store.invalidate(target)).await;
            }
        }

        self.record_mutation();
        metrics::record_request("invalidate", if removed.is_some() { "removed" } else { "absent" });
        debug!(locator = %locator, found = removed.is_some(), "Invalidated");
        removed
    }

    /// Clear every tier and reset statistics. Excludes every other
    /// operation while it runs.
    #[tracing::instrument(skip_all)]
    pub async fn invalidate_all(&self) {
        let _exclusive = self.locks.exclusive().await;

        if let Some(wb) = self.write_back.lock().as_ref() {
            wb.cancel_all();
        }
        if let Some(local) = &self.local {
            let cleared = local.lock().clear();
            debug!(count = cleared.len(), "Local tier cleared");
        }

        let timeout = self.config.tier_timeout();
        for (tier, store) in self.enabled_tiers() {
            // keep going whatever happens to one tier
            let _ = self.call_tier(tier, "invalidate_all", timeout, store.invalidate_all()).await;
        }

        self.stats.reset();
        self.stats.clear_entries();
        metrics::set_local_entries(0);
        self.record_mutation();
        info!("All tiers invalidated");
    }
}

impl<V: CacheValue + PartialEq> HierarchicalCache<V> {
    /// Remove the entry `locator` reaches only if its live value equals
    /// `expected`. Returns whether it was removed.
    #[tracing::instrument(skip_all, fields(locator))]
    pub async fn remove_if(&self, locator: impl Into<Locator>, expected: &V, options: &CallOptions) -> bool {
        let locator = locator.into();
        tracing::Span::current().record("locator", tracing::field::display(&locator));

        let keys = self.lock_keys(&locator);
        let _guard = self.locks.write(&keys).await;

        let matches = self
            .lookup_locked(&locator, options)
            .await
            .is_some_and(|current| current.value == *expected);
        if matches {
            self.remove_locked(&locator, options, true).await;
        }
        matches
    }
}
