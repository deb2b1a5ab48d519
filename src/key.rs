//! Series identity and the per-pass key arena
//!
//! A [`MetricKey`] is the aggregation identity of a specification (or of a
//! concrete series a wildcard specification expanded into). Keys live in a
//! [`MetricKeyCache`]: a dense arena addressed by [`KeyId`] plus an index
//! from `(metric, name, id)` to candidate keys. One cache is built per
//! processing pass and dropped with it; it is never shared across passes.
//!
//! # Example
//!
//! ```rust
//! use tsdb_gateway::key::{MetricKey, MetricKeyCache};
//! use tsdb_gateway::spec::MetricSpecification;
//! use tsdb_gateway::tags::TagSet;
//!
//! let spec = MetricSpecification::for_metric("sys.cpu").with_tag("host", "*");
//! let mut cache = MetricKeyCache::new();
//! let id = cache.put(MetricKey::from_spec(&spec));
//!
//! let returned = TagSet::from_pairs([("host", "web01")]);
//! assert_eq!(cache.get("sys.cpu", Some("sys.cpu"), None, Some(&returned)), Some(id));
//! ```

use std::collections::HashMap;

use crate::spec::MetricSpecification;
use crate::tags::TagSet;

/// Placeholder name used in the cache index when a key has no name
pub const DEFAULT_NAME: &str = "DEFAULT_NAME";

/// Placeholder id used in the cache index when a key has no id
pub const DEFAULT_ID: &str = "DEFAULT_ID";

/// Aggregation identity of a series
///
/// Equality and hashing are structural over all four fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    /// Metric name (metric, or name for calculated series)
    pub metric: String,

    /// Display name (name, or metric when no alias is given)
    pub name: String,

    /// Tag patterns requested by the specification
    pub tags: TagSet,

    /// Client identifier
    pub id: Option<String>,
}

impl MetricKey {
    /// Create a key from its parts
    pub fn new(
        metric: impl Into<String>,
        name: impl Into<String>,
        tags: TagSet,
        id: Option<String>,
    ) -> Self {
        Self {
            metric: metric.into(),
            name: name.into(),
            tags,
            id,
        }
    }

    /// Derive the key of a specification
    pub fn from_spec(spec: &MetricSpecification) -> Self {
        Self {
            metric: spec.metric_or_name().unwrap_or_default().to_string(),
            name: spec.name_or_metric().unwrap_or_default().to_string(),
            tags: spec.tag_set(),
            id: spec.id.clone().filter(|id| !id.is_empty()),
        }
    }

    /// Short name used to reference the series inside expressions
    ///
    /// The id when present, the name otherwise.
    pub fn shortcut(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

/// Handle of a key in a [`MetricKeyCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(usize);

impl KeyId {
    /// Position of the key in the arena
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Composite lookup key: `(metric, name-or-DEFAULT_NAME, id-or-DEFAULT_ID)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    metric: String,
    name: String,
    id: String,
}

impl CacheKey {
    fn new(metric: &str, name: Option<&str>, id: Option<&str>) -> Self {
        Self {
            metric: metric.to_string(),
            name: name.filter(|n| !n.is_empty()).unwrap_or(DEFAULT_NAME).to_string(),
            id: id.filter(|i| !i.is_empty()).unwrap_or(DEFAULT_ID).to_string(),
        }
    }
}

/// Arena of keys for one processing pass
///
/// Not thread-safe; owned by a single processing pass.
#[derive(Debug, Default)]
pub struct MetricKeyCache {
    keys: Vec<MetricKey>,
    index: HashMap<CacheKey, Vec<KeyId>>,
}

impl MetricKeyCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key and return its handle
    ///
    /// Duplicates are not detected; every call appends a new entry.
    pub fn put(&mut self, key: MetricKey) -> KeyId {
        let id = KeyId(self.keys.len());
        let cache_key = CacheKey::new(&key.metric, Some(&key.name), key.id.as_deref());
        self.index.entry(cache_key).or_default().push(id);
        self.keys.push(key);
        id
    }

    /// Find the first registered key whose tags equal or match `tags`
    ///
    /// `None` lookup tags match any candidate.
    pub fn get(
        &self,
        metric: &str,
        name: Option<&str>,
        id: Option<&str>,
        tags: Option<&TagSet>,
    ) -> Option<KeyId> {
        let candidates = self.index.get(&CacheKey::new(metric, name, id))?;
        candidates.iter().copied().find(|candidate| {
            let key = &self.keys[candidate.0];
            match tags {
                None => true,
                Some(wanted) => key.tags == *wanted || key.tags.matches(wanted),
            }
        })
    }

    /// Key behind a handle
    ///
    /// Handles are only produced by this cache, so lookups always succeed
    /// for handles obtained from it.
    pub fn key(&self, id: KeyId) -> &MetricKey {
        &self.keys[id.0]
    }

    /// Number of registered keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key is registered
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
