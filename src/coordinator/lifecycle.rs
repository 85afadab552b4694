//! Cache lifecycle: connect from configuration, maintenance, shutdown.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::{CacheValue, HierarchicalCache, SharedTier};
use crate::config::CacheConfig;
use crate::entry::now_millis;
use crate::metrics;
use crate::stats::StatisticsSnapshot;
use crate::storage::redis::RedisTier;
use crate::storage::sql::SqlTier;

impl<V: CacheValue> HierarchicalCache<V> {
    /// Build a cache wired to the backends named in `config`.
    ///
    /// `redis_url` backs the remote tier, `sql_url` the persistent tier.
    /// A backend that cannot be reached after the startup retry budget is
    /// logged and left out; the cache runs on whatever remains.
    #[tracing::instrument(skip_all, fields(has_redis, has_sql))]
    pub async fn connect(config: CacheConfig) -> Self {
        let mut builder = Self::builder(config.clone());

        let phase_start = Instant::now();
        match (&config.redis_url, config.remote_enabled) {
            (Some(url), true) => {
                info!(prefix = %config.redis_prefix, "Connecting remote tier (Redis)...");
                match RedisTier::with_prefix(url, &config.redis_prefix).await {
                    Ok(tier) => {
                        builder = builder.remote(Arc::new(tier) as SharedTier);
                        tracing::Span::current().record("has_redis", true);
                        metrics::set_backend_healthy("redis", true);
                        metrics::record_lifecycle_phase("redis_connect", phase_start.elapsed());
                        info!("Remote tier connected");
                    }
                    Err(e) => {
                        tracing::Span::current().record("has_redis", false);
                        metrics::set_backend_healthy("redis", false);
                        warn!(error = %e, "Failed to connect to Redis, continuing without remote tier");
                    }
                }
            }
            _ => {
                tracing::Span::current().record("has_redis", false);
            }
        }

        let phase_start = Instant::now();
        match (&config.sql_url, config.persistent_enabled) {
            (Some(url), true) => {
                info!("Connecting persistent tier (SQL)...");
                match SqlTier::new(url).await {
                    Ok(tier) => {
                        builder = builder.persistent(Arc::new(tier) as SharedTier);
                        tracing::Span::current().record("has_sql", true);
                        metrics::set_backend_healthy("sql", true);
                        metrics::record_lifecycle_phase("sql_connect", phase_start.elapsed());
                        info!("Persistent tier connected");
                    }
                    Err(e) => {
                        tracing::Span::current().record("has_sql", false);
                        metrics::set_backend_healthy("sql", false);
                        warn!(error = %e, "Failed to connect to SQL, continuing without persistent tier");
                    }
                }
            }
            _ => {
                tracing::Span::current().record("has_sql", false);
            }
        }

        builder.build()
    }

    /// Stop the write-back worker (draining what is queued), clear the local
    /// tier and release the adapters. Remote and persistent data is kept.
    /// Every step runs even if an earlier one fails.
    pub async fn shutdown(&self) {
        let shutdown_start = Instant::now();
        info!("Initiating hierarchical cache shutdown...");

        let write_back = self.write_back.lock().take();
        if let Some(wb) = write_back {
            debug!(pending = wb.pending(), "Draining write-back queue");
            wb.close().await;
        }

        if let Some(local) = &self.local {
            let cleared = local.lock().clear();
            debug!(count = cleared.len(), "Local tier cleared");
        }
        metrics::set_local_entries(0);

        for (tier, store) in self.enabled_tiers() {
            let _ = self
                .call_tier(tier, "shutdown", self.config.tier_timeout(), store.shutdown())
                .await;
        }

        metrics::record_lifecycle_phase("shutdown", shutdown_start.elapsed());
        info!("Hierarchical cache shutdown complete");
    }

    /// Sweep expired entries out of the local tier. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let Some(local) = &self.local else {
            return 0;
        };
        let (purged, len) = {
            let mut tier = local.lock();
            let purged = tier.purge_expired(now_millis());
            (purged, tier.len())
        };
        for entry in &purged {
            self.stats.entry_removed(entry);
        }
        metrics::set_local_entries(len);
        if !purged.is_empty() {
            debug!(count = purged.len(), "Purged expired local entries");
        }
        purged.len()
    }

    #[must_use]
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    /// Restart the counters. `total_keys` and `total_values` keep tracking
    /// what the local tier holds.
    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    /// Entries held by the local tier (expired ones not yet swept included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.local.as_ref().map_or(0, |l| l.lock().len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicted entries still waiting to be written back.
    #[must_use]
    pub fn pending_write_backs(&self) -> usize {
        self.write_back.lock().as_ref().map_or(0, |wb| wb.pending())
    }
}
