// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hierarchical pattern search.
//!
//! Every entry is registered under a set of *patterns* derived from its
//! canonical parameter sequence `p[0..n]` (sorted by level):
//!
//! ```text
//! params:   L0:region=emea  L1:category=shoes  L2:brand=acme
//!
//! chains:   L0:region=emea>L1:category=shoes>L2:brand=acme
//!           L0:region=emea>L1:category=shoes
//!           L1:category=shoes>L2:brand=acme
//! singles:  L0:region=emea
//!           L1:category=shoes
//!           L2:brand=acme
//! ```
//!
//! A query matches every entry whose parameter set contains all of the
//! query's parameters, adjacent in the hierarchy or not. Because each entry
//! registers every parameter on its own, that set is the intersection of the
//! single-parameter buckets, which [`PatternIndex::search`] computes by
//! walking the smallest bucket and checking each candidate's reverse entry.
//! Chain patterns serve exact lookups of a contiguous slice of the
//! hierarchy via [`PatternIndex::lookup`].

mod pattern_index;

pub use pattern_index::PatternIndex;

use crate::parameter::{canonicalize, join_pattern, SearchParameter};

/// Generate every pattern an entry with `parameters` is registered under.
///
/// Output is deterministic: contiguous ranges ordered by start, then end.
/// Single parameters are the `i == j` ranges.
#[must_use]
pub fn generate_patterns(parameters: &[SearchParameter]) -> Vec<String> {
    let canonical = canonicalize(parameters);
    let n = canonical.len();
    let mut patterns = Vec::with_capacity(n * (n + 1) / 2);
    for i in 0..n {
        for j in i..n {
            patterns.push(join_pattern(&canonical[i..=j]));
        }
    }
    patterns
}

/// The exact pattern string a query canonicalizes to.
#[must_use]
pub fn query_pattern(parameters: &[SearchParameter]) -> String {
    join_pattern(&canonicalize(parameters))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(name: &str, value: &str, level: u32) -> SearchParameter {
        SearchParameter::new(name, value, level).unwrap()
    }

    #[test]
    fn test_generate_three_levels() {
        let params = vec![p("brand", "acme", 2), p("region", "emea", 0), p("category", "shoes", 1)];
        let patterns = generate_patterns(&params);
        assert_eq!(
            patterns,
            vec![
                "L0:region=emea",
                "L0:region=emea>L1:category=shoes",
                "L0:region=emea>L1:category=shoes>L2:brand=acme",
                "L1:category=shoes",
                "L1:category=shoes>L2:brand=acme",
                "L2:brand=acme",
            ]
        );
    }

    #[test]
    fn test_generate_empty_and_single() {
        assert!(generate_patterns(&[]).is_empty());
        assert_eq!(generate_patterns(&[p("region", "emea", 0)]), vec!["L0:region=emea"]);
    }

    #[test]
    fn test_generate_is_deterministic_under_shuffle() {
        let a = vec![p("a", "1", 0), p("b", "2", 1), p("c", "3", 2), p("d", "4", 3)];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(generate_patterns(&a), generate_patterns(&b));
        assert_eq!(generate_patterns(&a).len(), 10);
    }

    #[test]
    fn test_query_pattern() {
        let q = vec![p("category", "shoes", 1), p("region", "emea", 0)];
        assert_eq!(query_pattern(&q), "L0:region=emea>L1:category=shoes");
    }
}
