// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic hierarchical-cache usage example.
//!
//! Demonstrates:
//! 1. Building a cache over an in-memory remote tier and a SQLite
//!    persistent tier (no external services needed)
//! 2. Storing a small product catalogue under key, alias and hierarchy
//! 3. Exact, gapped and alias lookups
//! 4. Linking an alias after the fact
//! 5. Cascading invalidation
//! 6. Statistics and raw metrics
//! 7. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=hierarchical_cache=debug cargo run --example basic_usage
//! ```

use std::sync::Arc;

use hierarchical_cache::{
    CacheConfig, CallOptions, FallbackStrategy, HierarchicalCache, MemoryTier, SearchParameter, SqlTier,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Product {
    name: String,
    price_cents: u64,
}

fn product(name: &str, price_cents: u64) -> Product {
    Product {
        name: name.to_string(),
        price_cents,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything for the dump at the end)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║         hierarchical-cache: Basic Usage Example               ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure the tiers
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Configuring tiers...");
    let dir = tempfile::tempdir()?;
    let sql_url = format!("sqlite://{}?mode=rwc", dir.path().join("catalogue.db").display());

    let config = CacheConfig {
        local_max_entries: 100,
        persistent_enabled: true,
        fallback_strategy: FallbackStrategy::RemoteThenPersistent,
        ..Default::default()
    };
    let cache: HierarchicalCache<Product> = HierarchicalCache::builder(config)
        .remote(Arc::new(MemoryTier::new()))
        .persistent(Arc::new(SqlTier::new(&sql_url).await?))
        .build();
    println!("   ✅ local + memory remote + SQLite persistent");

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Store a few products
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Storing products...");
    let emea = SearchParameter::new("region", "emea", 0)?;
    let apac = SearchParameter::new("region", "apac", 0)?;
    let shoes = SearchParameter::new("category", "shoes", 1)?;
    let hats = SearchParameter::new("category", "hats", 1)?;
    let acme = SearchParameter::new("brand", "acme", 2)?;
    let zenith = SearchParameter::new("brand", "zenith", 2)?;

    let opts = CallOptions::default();
    let catalogue = vec![
        ("sku-100", Some(100i64), vec![emea.clone(), shoes.clone(), acme.clone()], product("Trail runner", 8900)),
        ("sku-101", Some(101i64), vec![emea.clone(), shoes.clone(), zenith.clone()], product("City loafer", 12000)),
        ("sku-102", None, vec![emea.clone(), hats.clone(), acme.clone()], product("Sun hat", 2500)),
        ("sku-200", Some(200i64), vec![apac.clone(), shoes.clone(), acme.clone()], product("Trail runner", 9100)),
    ];
    for (key, alias, params, value) in &catalogue {
        match alias {
            Some(alias) => cache.put((*key, *alias), params, value.clone(), &opts).await?,
            None => cache.put(*key, params, value.clone(), &opts).await?,
        };
        println!("   └─ {} (alias {:?}) → {} @ {}c", key, alias, value.name, value.price_cents);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Lookups
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔍 Lookups...");
    let by_key = cache.get("sku-101", &opts).await;
    println!("   └─ get(\"sku-101\")            → {:?}", by_key.map(|p| p.name));
    let by_alias = cache.get(200i64, &opts).await;
    println!("   └─ get(200)                  → {:?}", by_alias.map(|p| p.name));

    let emea_acme = cache.search(&[emea.clone(), acme.clone()], &opts).await;
    println!("   └─ search(emea, acme)        → {:?}", names(&emea_acme));
    let all_shoes = cache.search(&[shoes.clone()], &opts).await;
    println!("   └─ search(shoes)             → {:?}", names(&all_shoes));

    // Skip the local tier: answered by the remote tier
    let remote = cache.get("sku-100", &CallOptions::skip_local()).await;
    println!("   └─ get(\"sku-100\") skip_local → {:?}", remote.map(|p| p.name));

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Link an alias to an entry stored without one
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔗 Linking alias 102 to sku-102...");
    cache.link_alias("sku-102", 102, &opts).await?;
    println!("   └─ get(102) → {:?}", cache.get(102i64, &opts).await.map(|p| p.name));
    match cache.link_alias("sku-101", 102, &opts).await {
        Ok(()) => println!("   └─ unexpected: alias 102 linked twice"),
        Err(e) => println!("   └─ second link rejected: {}", e),
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Cascading invalidation
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🧹 Invalidating alias 100...");
    cache.invalidate(100i64, &opts).await;
    println!("   └─ get(\"sku-100\")     → {:?}", cache.get("sku-100", &opts).await.map(|p| p.name));
    println!(
        "   └─ search(emea, acme) → {:?}",
        names(&cache.search(&[emea.clone(), acme.clone()], &opts).await)
    );

    let dropped = cache.invalidate_by_pattern(&[apac], &opts).await;
    println!("   └─ invalidate_by_pattern(apac) removed {}", dropped);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Statistics and metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Statistics:");
    println!("{}", serde_json::to_string_pretty(&cache.statistics())?);

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 7. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    cache.shutdown().await;
    println!("   ✅ Shutdown complete!");

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

fn names(products: &[Product]) -> Vec<&str> {
    products.iter().map(|p| p.name.as_str()).collect()
}

/// Dump all captured metrics, grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, label_str, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    histograms.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.2}", name, labels, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, labels, count, sum) in &histograms {
            println!("      └─ {}{} count={} sum={:.6}s", name, labels, count, sum);
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
