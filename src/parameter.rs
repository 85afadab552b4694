// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hierarchical search parameters.
//!
//! A [`SearchParameter`] is a named value tagged with its depth in a domain
//! hierarchy (`region` at level 0, `category` at level 1, ...). Its canonical
//! string form is `L{level}:{name}={value}`, which is what the pattern index
//! stores.
//!
//! # Example
//!
//! ```
//! use hierarchical_cache::SearchParameter;
//!
//! let region = SearchParameter::new("region", "emea", 0).unwrap();
//! assert_eq!(region.to_key(), "L0:region=emea");
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Separator between the canonical strings of a multi-parameter pattern.
pub const PATTERN_SEPARATOR: char = '>';

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawParameter")]
pub struct SearchParameter {
    name: String,
    value: String,
    level: u32,
}

/// Unvalidated wire shape; decoding goes through [`SearchParameter::new`].
#[derive(Deserialize)]
struct RawParameter {
    name: String,
    value: String,
    level: u32,
}

impl TryFrom<RawParameter> for SearchParameter {
    type Error = CacheError;

    fn try_from(raw: RawParameter) -> Result<Self> {
        Self::new(raw.name, raw.value, raw.level)
    }
}

impl SearchParameter {
    /// Create a parameter.
    ///
    /// Fails with [`CacheError::Validation`] if the name or value is empty,
    /// if either contains the pattern separator `>`, or if the name contains
    /// `=` (which would make the canonical form ambiguous).
    pub fn new(name: impl Into<String>, value: impl Into<String>, level: u32) -> Result<Self> {
        let name = name.into();
        let value = value.into();

        if name.trim().is_empty() {
            return Err(CacheError::validation("search parameter name is absent"));
        }
        if value.is_empty() {
            return Err(CacheError::validation(format!(
                "search parameter '{}' has no value",
                name
            )));
        }
        if name.contains(PATTERN_SEPARATOR) || value.contains(PATTERN_SEPARATOR) {
            return Err(CacheError::validation(format!(
                "search parameter '{}' contains reserved character '{}'",
                name, PATTERN_SEPARATOR
            )));
        }
        if name.contains('=') {
            return Err(CacheError::validation(format!(
                "search parameter name '{}' contains '='",
                name
            )));
        }

        Ok(Self { name, value, level })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Canonical string form: `L{level}:{name}={value}`.
    #[must_use]
    pub fn to_key(&self) -> String {
        format!("L{}:{}={}", self.level, self.name, self.value)
    }
}

impl Ord for SearchParameter {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl PartialOrd for SearchParameter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SearchParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}:{}={}", self.level, self.name, self.value)
    }
}

/// Sort by level (ties by name, then value) and drop duplicates.
#[must_use]
pub fn canonicalize(parameters: &[SearchParameter]) -> Vec<SearchParameter> {
    let mut sorted = parameters.to_vec();
    sorted.sort();
    sorted.dedup();
    sorted
}

/// Join already-canonical parameters into a pattern string.
#[must_use]
pub fn join_pattern(parameters: &[SearchParameter]) -> String {
    let mut out = String::new();
    for (i, p) in parameters.iter().enumerate() {
        if i > 0 {
            out.push(PATTERN_SEPARATOR);
        }
        out.push_str(&p.to_key());
    }
    out
}
