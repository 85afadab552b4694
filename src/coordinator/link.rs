// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Link operations: attach an alias or extra parameters to a live entry.
//!
//! A link never mutates an entry in place. It builds the successor entry
//! (same key, value, creation time and TTL, new identity) and swaps it in
//! under the write locks of every access path involved, so readers see
//! either the old entry or the new one.

use tracing::{debug, info};

use super::{CacheValue, HierarchicalCache};
use crate::entry::{CacheEntry, Locator};
use crate::error::{CacheError, Result};
use crate::metrics;
use crate::options::CallOptions;
use crate::parameter::{canonicalize, SearchParameter};

impl<V: CacheValue> HierarchicalCache<V> {
    /// Attach `alias` to the entry stored under `key`.
    ///
    /// Fails with [`CacheError::LinkConflict`] when no entry exists for
    /// `key`, when that entry already has a different alias, or when
    /// `alias` already belongs to another entry. Linking the alias the entry
    /// already has is a no-op.
    #[tracing::instrument(skip(self, options))]
    pub async fn link_alias(&self, key: &str, alias: i64, options: &CallOptions) -> Result<()> {
        if key.trim().is_empty() {
            return Err(CacheError::validation("key is empty"));
        }
        let by_key = Locator::Key(key.to_string());
        let by_alias = Locator::Alias(alias);

        // both access paths, one ordered acquisition
        let mut keys = self.lock_keys(&by_key);
        keys.extend(self.lock_keys(&by_alias));
        keys.sort();
        keys.dedup();
        let _guard = self.locks.write(&keys).await;

        let Some(existing) = self.lookup_locked(&by_key, options).await else {
            return Err(conflict("alias", format!("no entry for key '{key}'")));
        };
        match existing.alias() {
            Some(current) if current == alias => {
                metrics::record_link("alias", "unchanged");
                return Ok(());
            }
            Some(current) => {
                return Err(conflict("alias", format!("key '{key}' is already linked to alias {current}")));
            }
            None => {}
        }
        if let Some(owner) = self.lookup_locked(&by_alias, options).await {
            if owner.identity() != existing.identity() {
                return Err(conflict("alias", format!("alias {alias} is already linked to {}", owner.locator())));
            }
        }

        let successor = existing.relinked(Some(alias), existing.parameters());
        self.swap_linked(&existing, successor, options).await;
        metrics::record_link("alias", "linked");
        info!(key, alias, "Alias linked");
        Ok(())
    }

    /// Extend the parameter set of the entry `locator` reaches.
    ///
    /// Fails with [`CacheError::LinkConflict`] when there is no such entry or
    /// none of `parameters` is new to it.
    #[tracing::instrument(skip_all, fields(locator))]
    pub async fn link_parameters(
        &self,
        locator: impl Into<Locator>,
        parameters: &[SearchParameter],
        options: &CallOptions,
    ) -> Result<()> {
        let locator = locator.into();
        tracing::Span::current().record("locator", tracing::field::display(&locator));

        let keys = self.lock_keys(&locator);
        let _guard = self.locks.write(&keys).await;

        let Some(existing) = self.lookup_locked(&locator, options).await else {
            return Err(conflict("parameters", format!("no entry for {locator}")));
        };

        let fresh: Vec<SearchParameter> = canonicalize(parameters)
            .into_iter()
            .filter(|p| !existing.parameters().contains(p))
            .collect();
        if fresh.is_empty() {
            return Err(conflict("parameters", format!("no new parameters for {locator}")));
        }

        let mut merged = existing.parameters().to_vec();
        merged.extend(fresh.iter().cloned());
        let successor = existing.relinked(existing.alias(), &merged);
        self.swap_linked(&existing, successor, options).await;

        metrics::record_link("parameters", "linked");
        debug!(locator = %locator, added = fresh.len(), "Parameters linked");
        Ok(())
    }

    /// Retire `old` and install `new` on every tier this call writes to.
    async fn swap_linked(&self, old: &CacheEntry<V>, new: CacheEntry<V>, options: &CallOptions) {
        self.cancel_write_back(&old.locator());

        let retired = self.local.as_ref().and_then(|l| l.lock().remove_identity(old.identity()));
        if let Some(retired) = retired {
            self.stats.entry_removed(&retired);
        }
        if options.writes_local() {
            self.local_insert(new.clone());
        }

        // tier puts replace whatever the key or alias reached
        if self.config.write_through {
            self.write_through(&new, options).await;
        }
        self.record_mutation();
    }
}

fn conflict(kind: &'static str, message: String) -> CacheError {
    metrics::record_link(kind, "conflict");
    debug!(kind, %message, "Link rejected");
    CacheError::link_conflict(message)
}
