//! Tag sets and wildcard matching
//!
//! A [`TagSet`] maps tag keys to value patterns. A pattern is either a
//! literal, the wildcard `*`, or a `|`-joined list of literal alternatives.
//! The same type holds concrete tags returned by the backend, where every
//! value is a literal.
//!
//! # Example
//!
//! ```rust
//! use tsdb_gateway::tags::TagSet;
//!
//! let query = TagSet::from_pairs([("host", "*"), ("dc", "us-east|us-west")]);
//! let series = TagSet::from_pairs([("host", "web01"), ("dc", "us-west"), ("env", "prod")]);
//!
//! assert!(query.matches(&series));
//! assert!(!series.matches(&query));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Pattern accepting any value
pub const WILDCARD: &str = "*";

/// Separator between OR-ed literal alternatives
pub const ALTERNATIVE_SEPARATOR: char = '|';

/// Collection of tag key to value-pattern pairs
///
/// Keys are kept sorted so equality, hashing and display are independent of
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build a tag set from `(key, pattern)` pairs
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a tag set from per-key value lists, OR-joining multiple values
    pub fn from_value_lists(lists: &BTreeMap<String, Vec<String>>) -> Self {
        Self(
            lists
                .iter()
                .filter(|(_, values)| !values.is_empty())
                .map(|(k, values)| (k.clone(), values.join("|")))
                .collect(),
        )
    }

    /// Explode patterns back into per-key value lists
    pub fn to_value_lists(&self) -> BTreeMap<String, Vec<String>> {
        self.0
            .iter()
            .map(|(k, pattern)| {
                let values = pattern
                    .split(ALTERNATIVE_SEPARATOR)
                    .map(str::to_string)
                    .collect();
                (k.clone(), values)
            })
            .collect()
    }

    /// Insert or replace a tag pattern
    pub fn insert(&mut self, key: impl Into<String>, pattern: impl Into<String>) {
        self.0.insert(key.into(), pattern.into());
    }

    /// Pattern for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set holds no tags
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(key, pattern)` pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Rewrite every value with `f`, keeping keys
    pub fn map_values(&self, f: impl Fn(&str) -> String) -> Self {
        Self(self.0.iter().map(|(k, v)| (k.clone(), f(v))).collect())
    }

    /// Whether this (query-side) set accepts the concrete `other` set
    ///
    /// Every key of `self` must be present in `other` with a value the
    /// pattern accepts. `other` may carry extra keys. A set with more keys
    /// than `other` can never match.
    pub fn matches(&self, other: &TagSet) -> bool {
        if self.len() > other.len() {
            return false;
        }

        self.0.iter().all(|(key, pattern)| match other.0.get(key) {
            Some(value) => pattern_accepts(pattern, value),
            None => false,
        })
    }
}

/// Whether a single pattern accepts a concrete value
pub fn pattern_accepts(pattern: &str, value: &str) -> bool {
    if pattern == WILDCARD || pattern == value {
        return true;
    }
    pattern.contains(ALTERNATIVE_SEPARATOR)
        && pattern.split(ALTERNATIVE_SEPARATOR).any(|alt| alt == value)
}

impl fmt::Display for TagSet {
    /// Formats as the DSL tag block body: `k=v,k2=v2`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for TagSet {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}
