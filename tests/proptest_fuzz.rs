//! Property-based tests (fuzzing) for identity, pattern and search behaviour.
//!
//! Uses proptest to generate random parameter sets, shuffles and subsets,
//! and malformed inputs, and checks the cache never panics and always finds
//! an entry through any subset of its hierarchy.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;
use serde_json::{json, Value};

use hierarchical_cache::entry::identity;
use hierarchical_cache::parameter::canonicalize;
use hierarchical_cache::search::generate_patterns;
use hierarchical_cache::{
    CacheConfig, CacheEntry, CallOptions, HierarchicalCache, MemoryTier, PatternIndex, SearchParameter, StoredEntry,
    TierStore,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn param_strategy() -> impl Strategy<Value = SearchParameter> {
    ("[a-z]{1,8}", "[a-z0-9]{1,8}", 0u32..6)
        .prop_map(|(name, value, level)| SearchParameter::new(name, value, level).unwrap())
}

fn params_strategy() -> impl Strategy<Value = Vec<SearchParameter>> {
    prop::collection::vec(param_strategy(), 1..7)
}

/// A parameter set and a shuffled copy of it
fn shuffled_pair() -> impl Strategy<Value = (Vec<SearchParameter>, Vec<SearchParameter>)> {
    params_strategy().prop_flat_map(|params| (Just(params.clone()), Just(params).prop_shuffle()))
}

/// A parameter set and a non-empty subset of it (gaps allowed)
fn subset_pair() -> impl Strategy<Value = (Vec<SearchParameter>, Vec<SearchParameter>)> {
    params_strategy().prop_flat_map(|params| {
        let n = params.len();
        (Just(params.clone()), prop::sample::subsequence(params, 1..=n))
    })
}

/// Arbitrary JSON values (including shapes no record has)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,  // depth
        64, // max nodes
        10, // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10).prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// Identity and pattern determinism
// =============================================================================

proptest! {
    #[test]
    fn prop_identity_ignores_parameter_order(
        (params, shuffled) in shuffled_pair(),
        key in prop::option::of("[a-z]{1,10}"),
        alias in prop::option::of(any::<i64>()),
    ) {
        prop_assert_eq!(
            identity(key.as_deref(), alias, &params),
            identity(key.as_deref(), alias, &shuffled)
        );
    }

    #[test]
    fn prop_identity_is_hex_digest(params in params_strategy(), key in "[a-z]{1,10}") {
        let id = identity(Some(&key), None, &params);
        prop_assert_eq!(id.len(), 64);
        prop_assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn prop_patterns_ignore_parameter_order((params, shuffled) in shuffled_pair()) {
        prop_assert_eq!(generate_patterns(&params), generate_patterns(&shuffled));
    }

    #[test]
    fn prop_pattern_count_is_triangular(params in params_strategy()) {
        let n = canonicalize(&params).len();
        let patterns = generate_patterns(&params);
        prop_assert_eq!(patterns.len(), n * (n + 1) / 2);
        // every single parameter is registered on its own
        for p in canonicalize(&params) {
            prop_assert!(patterns.contains(&p.to_key()));
        }
    }
}

// =============================================================================
// Subset monotonicity
// =============================================================================

proptest! {
    #[test]
    fn prop_index_finds_entry_by_any_subset((params, subset) in subset_pair()) {
        let mut index = PatternIndex::new();
        index.register("target", &params);
        index.register("other", &[SearchParameter::new("unrelated", "x", 9).unwrap()]);

        prop_assert_eq!(index.search(&subset), vec!["target".to_string()]);
    }

    #[test]
    fn prop_index_rejects_foreign_parameter(
        (params, subset) in subset_pair(),
        foreign in "[A-Z]{1,4}",
    ) {
        let mut index = PatternIndex::new();
        index.register("target", &params);

        // values are lowercase, so this one is never part of the entry
        let mut query = subset;
        query.push(SearchParameter::new("region", foreign, 0).unwrap());
        prop_assert!(index.search(&query).is_empty());
    }

    #[test]
    fn prop_unregister_leaves_index_empty(params in params_strategy()) {
        let mut index = PatternIndex::new();
        index.register("target", &params);
        prop_assert_eq!(index.unregister("target"), generate_patterns(&params).len());
        prop_assert!(index.is_empty());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_memory_tier_finds_entry_by_any_subset((params, subset) in subset_pair()) {
        let rt = runtime();
        let found = rt.block_on(async {
            let tier = MemoryTier::new();
            let record: StoredEntry =
                CacheEntry::new(Some("k".to_string()), Some(1), &params, json!("v"), None).unwrap();
            tier.put(&record).await.unwrap();
            tier.search(&subset).await.unwrap()
        });
        prop_assert_eq!(found.len(), 1);
        prop_assert_eq!(found[0].key(), Some("k"));
    }

    #[test]
    fn prop_cache_finds_entry_by_any_subset((params, subset) in subset_pair()) {
        let rt = runtime();
        let hits = rt.block_on(async {
            let cache: HierarchicalCache<String> = HierarchicalCache::local_only(CacheConfig {
                remote_enabled: false,
                ..Default::default()
            });
            let opts = CallOptions::default();
            cache.put("k", &params, "v".to_string(), &opts).await.unwrap();
            cache.search(&subset, &opts).await
        });
        prop_assert_eq!(hits, vec!["v".to_string()]);
    }
}

// =============================================================================
// Malformed input never panics
// =============================================================================

proptest! {
    #[test]
    fn fuzz_search_parameter_new(name in ".*", value in ".*", level in any::<u32>()) {
        let valid = !name.trim().is_empty()
            && !value.is_empty()
            && !name.contains('>')
            && !value.contains('>')
            && !name.contains('=');
        prop_assert_eq!(SearchParameter::new(name, value, level).is_ok(), valid);
    }

    #[test]
    fn fuzz_stored_entry_from_arbitrary_json(json in arbitrary_json_strategy()) {
        // Should not panic, may return an error
        let _ = serde_json::from_value::<StoredEntry>(json);
    }

    #[test]
    fn fuzz_decode_arbitrary_payload(payload in arbitrary_json_strategy()) {
        let is_string = payload.is_string();
        let record: StoredEntry = CacheEntry::new(Some("k".to_string()), None, &[], payload, None).unwrap();
        prop_assert_eq!(record.decode::<String>().is_ok(), is_string);
    }

    #[test]
    fn fuzz_entry_key_validation(key in ".*", alias in prop::option::of(any::<i64>())) {
        let result = CacheEntry::new(Some(key.clone()), alias, &[], 0u8, None);
        prop_assert_eq!(result.is_ok(), !key.trim().is_empty());
    }
}
