// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Eviction write-back to the remote tier.
//!
//! The local tier hands evicted entries to a bounded channel drained by one
//! background task. Offering never blocks: a full queue drops the entry
//! with a warning. A later write or invalidation on the same key/alias
//! cancels a still-pending write-back so the worker can never resurrect a
//! stale value.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::types::SharedTier;
use crate::config::Tier;
use crate::entry::{duration_millis, Locator, StoredEntry};
use crate::locking::LockTable;
use crate::metrics;
use crate::stats::CacheStatistics;

pub(super) struct WriteBack {
    tx: mpsc::Sender<StoredEntry>,
    /// identity -> locator of every queued, not yet written record
    pending: Arc<Mutex<HashMap<String, Locator>>>,
    worker: JoinHandle<()>,
}

fn overlaps(a: &Locator, b: &Locator) -> bool {
    (a.key().is_some() && a.key() == b.key()) || (a.alias().is_some() && a.alias() == b.alias())
}

impl WriteBack {
    /// Start the worker on the current tokio runtime. `None` outside one.
    pub(super) fn spawn(
        remote: SharedTier,
        locks: Arc<LockTable>,
        stats: Arc<CacheStatistics>,
        capacity: usize,
        timeout: Duration,
    ) -> Option<Self> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime at build time, eviction write-back disabled");
            return None;
        };

        let (tx, mut rx) = mpsc::channel::<StoredEntry>(capacity.max(1));
        let pending: Arc<Mutex<HashMap<String, Locator>>> = Arc::new(Mutex::new(HashMap::new()));
        let worker_pending = pending.clone();

        let worker = runtime.spawn(async move {
            while let Some(record) = rx.recv().await {
                let locator = record.locator();
                let _guard = locks.write(&locator.lock_keys()).await;
                if worker_pending.lock().remove(record.identity()).is_none() {
                    debug!(locator = %locator, "Write-back cancelled by a newer operation");
                    continue;
                }

                match tokio::time::timeout(timeout, remote.put(&record)).await {
                    Ok(Ok(())) => {
                        stats.tier(Tier::Remote).put();
                        metrics::record_write_back("written");
                        debug!(locator = %locator, "Evicted entry written back to remote tier");
                    }
                    Ok(Err(e)) => {
                        stats.tier(Tier::Remote).error();
                        metrics::record_write_back("failed");
                        warn!(locator = %locator, error = %e, "Write-back failed");
                    }
                    Err(_) => {
                        stats.tier(Tier::Remote).error();
                        metrics::record_timeout(Tier::Remote.as_str());
                        metrics::record_write_back("failed");
                        warn!(locator = %locator, timeout_ms = duration_millis(timeout), "Write-back timed out");
                    }
                }
            }
            debug!("Write-back worker stopped");
        });

        Some(Self { tx, pending, worker })
    }

    /// Queue a record without blocking. Returns whether it was accepted.
    pub(super) fn offer(&self, record: StoredEntry) -> bool {
        let identity = record.identity().to_string();
        self.pending.lock().insert(identity.clone(), record.locator());

        match self.tx.try_send(record) {
            Ok(()) => {
                metrics::record_write_back("queued");
                true
            }
            Err(TrySendError::Full(record)) => {
                self.pending.lock().remove(&identity);
                metrics::record_write_back("dropped");
                warn!(locator = %record.locator(), "Write-back queue full, dropping evicted entry");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.pending.lock().remove(&identity);
                debug!("Write-back worker gone, dropping evicted entry");
                false
            }
        }
    }

    /// Cancel queued write-backs that share a key or alias with `locator`.
    pub(super) fn cancel(&self, locator: &Locator) {
        self.pending.lock().retain(|_, queued| !overlaps(queued, locator));
    }

    pub(super) fn cancel_all(&self) {
        self.pending.lock().clear();
    }

    /// Queued records not yet written or cancelled.
    pub(super) fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Stop accepting, drain what is queued, wait for the worker.
    pub(super) async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Write-back worker ended abnormally");
        }
    }
}
