// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Forward (pattern → identities) and reverse (identity → patterns) index.
//!
//! Not internally synchronized: the owner wraps it in whatever lock guards
//! the rest of its state, so forward and reverse maps always move together.

use std::collections::{HashMap, HashSet};

use crate::parameter::{canonicalize, SearchParameter};

use super::generate_patterns;

#[derive(Debug, Default)]
pub struct PatternIndex {
    forward: HashMap<String, HashSet<String>>,
    reverse: HashMap<String, HashSet<String>>,
}

impl PatternIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identity` under every pattern generated from `parameters`.
    /// Additive: existing registrations of other identities are untouched.
    pub fn register(&mut self, identity: &str, parameters: &[SearchParameter]) {
        let patterns = generate_patterns(parameters);
        if patterns.is_empty() {
            return;
        }
        let owned = self.reverse.entry(identity.to_string()).or_default();
        for pattern in patterns {
            self.forward
                .entry(pattern.clone())
                .or_default()
                .insert(identity.to_string());
            owned.insert(pattern);
        }
    }

    /// Remove `identity` from every pattern it was registered under,
    /// dropping patterns left empty. Returns how many patterns it was in.
    pub fn unregister(&mut self, identity: &str) -> usize {
        let Some(patterns) = self.reverse.remove(identity) else {
            return 0;
        };
        for pattern in &patterns {
            if let Some(ids) = self.forward.get_mut(pattern) {
                ids.remove(identity);
                if ids.is_empty() {
                    self.forward.remove(pattern);
                }
            }
        }
        patterns.len()
    }

    /// Identities whose parameter set contains every query parameter.
    ///
    /// An empty query matches nothing. The result is sorted so callers get
    /// a stable order.
    #[must_use]
    pub fn search(&self, parameters: &[SearchParameter]) -> Vec<String> {
        let wanted: Vec<String> = canonicalize(parameters).iter().map(SearchParameter::to_key).collect();
        if wanted.is_empty() {
            return Vec::new();
        }

        let mut buckets = Vec::with_capacity(wanted.len());
        for key in &wanted {
            match self.forward.get(key) {
                Some(ids) => buckets.push(ids),
                None => return Vec::new(),
            }
        }
        let Some(smallest) = buckets.iter().min_by_key(|ids| ids.len()).copied() else {
            return Vec::new();
        };

        let mut hits: Vec<String> = smallest
            .iter()
            .filter(|id| {
                self.reverse
                    .get(id.as_str())
                    .is_some_and(|owned| wanted.iter().all(|k| owned.contains(k)))
            })
            .cloned()
            .collect();
        hits.sort();
        hits
    }

    /// Exact pattern lookup (no subset matching).
    #[must_use]
    pub fn lookup(&self, pattern: &str) -> Option<&HashSet<String>> {
        self.forward.get(pattern)
    }

    /// Patterns `identity` is currently registered under.
    #[must_use]
    pub fn patterns_of(&self, identity: &str) -> Option<&HashSet<String>> {
        self.reverse.get(identity)
    }

    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.forward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::query_pattern;

    fn p(name: &str, value: &str, level: u32) -> SearchParameter {
        SearchParameter::new(name, value, level).unwrap()
    }

    fn hierarchy() -> Vec<SearchParameter> {
        vec![p("region", "emea", 0), p("category", "shoes", 1), p("brand", "acme", 2), p("product", "boot", 3)]
    }

    #[test]
    fn test_exact_chain_lookup() {
        let mut index = PatternIndex::new();
        index.register("id-1", &hierarchy());

        let chain = query_pattern(&hierarchy()[..3]);
        assert!(index.lookup(&chain).unwrap().contains("id-1"));
        assert_eq!(index.search(&hierarchy()[..3]), vec!["id-1"]);
    }

    #[test]
    fn test_gapped_query_matches() {
        let mut index = PatternIndex::new();
        index.register("id-1", &hierarchy());

        let gapped = vec![p("region", "emea", 0), p("product", "boot", 3)];
        // no chain pattern exists for a gapped pair
        assert!(index.lookup(&query_pattern(&gapped)).is_none());
        assert_eq!(index.search(&gapped), vec!["id-1"]);
    }

    #[test]
    fn test_search_requires_every_parameter() {
        let mut index = PatternIndex::new();
        index.register("id-1", &[p("region", "emea", 0), p("category", "shoes", 1)]);
        index.register("id-2", &[p("region", "emea", 0), p("category", "hats", 1)]);

        assert_eq!(index.search(&[p("region", "emea", 0)]), vec!["id-1", "id-2"]);
        assert_eq!(index.search(&[p("region", "emea", 0), p("category", "hats", 1)]), vec!["id-2"]);
        assert!(index.search(&[p("region", "apac", 0)]).is_empty());
        assert!(index.search(&[]).is_empty());
    }

    #[test]
    fn test_shared_bucket_keeps_both_identities() {
        let mut index = PatternIndex::new();
        index.register("id-1", &[p("region", "emea", 0)]);
        index.register("id-2", &[p("region", "emea", 0)]);
        assert_eq!(index.lookup("L0:region=emea").unwrap().len(), 2);
    }

    #[test]
    fn test_unregister_prunes_empty_patterns() {
        let mut index = PatternIndex::new();
        index.register("id-1", &hierarchy());
        index.register("id-2", &[p("region", "emea", 0)]);
        assert_eq!(index.pattern_count(), 10);

        assert_eq!(index.unregister("id-1"), 10);
        assert_eq!(index.pattern_count(), 1);
        assert!(index.patterns_of("id-1").is_none());
        assert_eq!(index.search(&[p("region", "emea", 0)]), vec!["id-2"]);

        assert_eq!(index.unregister("id-2"), 1);
        assert!(index.is_empty());
        assert_eq!(index.unregister("id-2"), 0);
    }

    #[test]
    fn test_register_without_parameters_is_noop() {
        let mut index = PatternIndex::new();
        index.register("id-1", &[]);
        assert!(index.is_empty());
        assert!(index.patterns_of("id-1").is_none());
    }
}
