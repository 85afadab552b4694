// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the hierarchical cache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `hierarchical_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: local, remote, persistent
//! - `operation`: get, search, put, invalidate, invalidate_all, link
//! - `status`: hit, miss, success, error

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record one tier interaction
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "hierarchical_cache_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record tier call latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "hierarchical_cache_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a caller-level request outcome (hit anywhere vs. miss everywhere)
pub fn record_request(operation: &str, outcome: &str) {
    counter!(
        "hierarchical_cache_requests_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record local-tier capacity evictions
pub fn record_eviction(count: usize) {
    counter!("hierarchical_cache_evictions_total").increment(count as u64);
}

/// Record the fate of an eviction write-back (queued, dropped, written, failed)
pub fn record_write_back(status: &str) {
    counter!(
        "hierarchical_cache_write_back_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Set current local tier entry count
pub fn set_local_entries(count: usize) {
    gauge!("hierarchical_cache_local_entries").set(count as f64);
}

/// Record a tier timeout
pub fn record_timeout(tier: &str) {
    counter!(
        "hierarchical_cache_timeouts_total",
        "tier" => tier.to_string()
    )
    .increment(1);
}

/// Record a link outcome (success, conflict)
pub fn record_link(kind: &str, outcome: &str) {
    counter!(
        "hierarchical_cache_links_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set backend health (1 = reachable at connect time)
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!(
        "hierarchical_cache_backend_healthy",
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

/// Record a connect/shutdown phase duration
pub fn record_lifecycle_phase(phase: &str, duration: Duration) {
    histogram!(
        "hierarchical_cache_lifecycle_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}
