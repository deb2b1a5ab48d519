//! Fixed-width time bucket grid
//!
//! The time axis is divided into buckets of `bucket_size` seconds; the
//! bucket index of a timestamp is `timestamp / bucket_size` (integer
//! division, truncating toward zero). Each bucket holds the raw points of
//! every series that fell into it, addressable by [`KeyId`] and by the
//! series' shortcut for expression evaluation.
//!
//! ```text
//!  index:      0            1            2            3
//!          ┌──────────┬────────────┬────────────┬────────────┐
//!  key A   │ 1.0 1.5  │            │ 2.0        │ 2.5        │
//!  key B   │ 7.0      │ 8.0        │            │ 9.0        │
//!          └──────────┴────────────┴────────────┴────────────┘
//!           t=0..59     t=60..119    t=120..179   t=180..239   (bucket_size = 60)
//! ```
//!
//! # Example
//!
//! ```rust
//! use tsdb_gateway::bucket::BucketStore;
//! use tsdb_gateway::key::{MetricKey, MetricKeyCache};
//! use tsdb_gateway::tags::TagSet;
//!
//! let mut keys = MetricKeyCache::new();
//! let cpu = keys.put(MetricKey::new("sys.cpu", "cpu", TagSet::new(), None));
//!
//! let mut store = BucketStore::new(60).unwrap();
//! store.add(cpu, "cpu", 125, 42.0);
//!
//! let bucket = store.get_bucket(179).unwrap();
//! assert_eq!(bucket.index(), 2);
//! assert_eq!(bucket.value_by_shortcut("cpu"), Some(42.0));
//! ```

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::key::KeyId;
use crate::types::{DataPoint, QueryStatus};

/// Points of one series inside one bucket
#[derive(Debug, Clone, Default)]
pub struct BucketSeries {
    points: Vec<DataPoint>,
    interpolated: bool,
}

impl BucketSeries {
    /// Raw points in insertion order
    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    /// Whether the value was produced by gap filling
    pub fn is_interpolated(&self) -> bool {
        self.interpolated
    }

    /// Bucket value: the mean of the points
    pub fn value(&self) -> Option<f64> {
        match self.points.len() {
            0 => None,
            1 => Some(self.points[0].value),
            n => Some(self.points.iter().map(|p| p.value).sum::<f64>() / n as f64),
        }
    }
}

/// One slot of the time grid
#[derive(Debug, Clone)]
pub struct Bucket {
    index: i64,
    timestamp: i64,
    series: HashMap<KeyId, BucketSeries>,
    shortcuts: HashMap<String, KeyId>,
}

impl Bucket {
    fn new(index: i64, bucket_size: i64) -> Self {
        Self {
            index,
            timestamp: index.saturating_mul(bucket_size),
            series: HashMap::new(),
            shortcuts: HashMap::new(),
        }
    }

    /// Bucket index on the grid
    pub fn index(&self) -> i64 {
        self.index
    }

    /// Start timestamp of the bucket (`index * bucket_size`)
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Whether the bucket holds data for a key
    pub fn contains(&self, key: KeyId) -> bool {
        self.series.contains_key(&key)
    }

    /// Series data of a key
    pub fn series(&self, key: KeyId) -> Option<&BucketSeries> {
        self.series.get(&key)
    }

    /// Bucket value of a key
    pub fn value(&self, key: KeyId) -> Option<f64> {
        self.series.get(&key).and_then(BucketSeries::value)
    }

    /// Bucket value of the first series registered under a shortcut
    pub fn value_by_shortcut(&self, shortcut: &str) -> Option<f64> {
        self.shortcuts.get(shortcut).and_then(|key| self.value(*key))
    }

    /// Keys present in this bucket
    pub fn keys(&self) -> impl Iterator<Item = KeyId> + '_ {
        self.series.keys().copied()
    }

    fn entry(&mut self, key: KeyId, shortcut: &str) -> &mut BucketSeries {
        self.shortcuts.entry(shortcut.to_string()).or_insert(key);
        self.series.entry(key).or_default()
    }
}

/// Ordered grid of buckets plus per-key query status
///
/// Not thread-safe; written only by the orchestrating pass after all
/// backend results are collected.
#[derive(Debug, Clone)]
pub struct BucketStore {
    bucket_size: i64,
    buckets: BTreeMap<i64, Bucket>,
    statuses: HashMap<KeyId, QueryStatus>,
}

impl BucketStore {
    /// Create an empty store with buckets of `bucket_size` seconds
    pub fn new(bucket_size: i64) -> Result<Self> {
        if bucket_size <= 0 {
            return Err(Error::Configuration(format!(
                "Bucket size must be > 0, got {}",
                bucket_size
            )));
        }
        Ok(Self {
            bucket_size,
            buckets: BTreeMap::new(),
            statuses: HashMap::new(),
        })
    }

    /// Width of a bucket
    pub fn bucket_size(&self) -> i64 {
        self.bucket_size
    }

    /// Bucket index of a timestamp
    pub fn bucket_index(&self, timestamp: i64) -> i64 {
        timestamp / self.bucket_size
    }

    /// Add a raw point for a key
    pub fn add(&mut self, key: KeyId, shortcut: &str, timestamp: i64, value: f64) {
        let index = self.bucket_index(timestamp);
        let size = self.bucket_size;
        self.buckets
            .entry(index)
            .or_insert_with(|| Bucket::new(index, size))
            .entry(key, shortcut)
            .points
            .push(DataPoint::new(timestamp, value));
    }

    /// Add every point of a series
    pub fn add_all(&mut self, key: KeyId, shortcut: &str, points: &[DataPoint]) {
        for point in points {
            self.add(key, shortcut, point.timestamp, point.value);
        }
    }

    /// Store a gap-filling value for a key in an existing bucket
    ///
    /// Ignored when the bucket does not exist or already holds data for the
    /// key.
    pub fn fill(&mut self, key: KeyId, shortcut: &str, index: i64, value: f64) {
        if let Some(bucket) = self.buckets.get_mut(&index) {
            if bucket.contains(key) {
                return;
            }
            let timestamp = bucket.timestamp;
            let series = bucket.entry(key, shortcut);
            series.points.push(DataPoint::new(timestamp, value));
            series.interpolated = true;
        }
    }

    /// Bucket containing an absolute timestamp
    pub fn get_bucket(&self, timestamp: i64) -> Option<&Bucket> {
        self.buckets.get(&self.bucket_index(timestamp))
    }

    /// Sorted indices of populated buckets
    pub fn timestamps(&self) -> Vec<i64> {
        self.buckets.keys().copied().collect()
    }

    /// Buckets in index order
    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.values()
    }

    /// Number of populated buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no bucket is populated
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Record the status of a key, independent of its points
    pub fn add_query_status(&mut self, key: KeyId, status: QueryStatus) {
        self.statuses.insert(key, status);
    }

    /// Recorded status of a key
    pub fn query_status(&self, key: KeyId) -> Option<&QueryStatus> {
        self.statuses.get(&key)
    }

    /// Values of a key along the grid, one entry per populated bucket
    pub fn series_values(&self, key: KeyId) -> Vec<(i64, Option<f64>)> {
        self.buckets
            .iter()
            .map(|(index, bucket)| (*index, bucket.value(key)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{MetricKey, MetricKeyCache};
    use crate::tags::TagSet;

    fn two_keys() -> (KeyId, KeyId) {
        let mut cache = MetricKeyCache::new();
        let a = cache.put(MetricKey::new("a", "a", TagSet::new(), None));
        let b = cache.put(MetricKey::new("b", "b", TagSet::new(), None));
        (a, b)
    }

    #[test]
    fn test_rejects_non_positive_size() {
        assert!(BucketStore::new(0).is_err());
        assert!(BucketStore::new(-5).is_err());
    }

    #[test]
    fn test_bucket_index_truncates() {
        let store = BucketStore::new(10).unwrap();
        assert_eq!(store.bucket_index(0), 0);
        assert_eq!(store.bucket_index(9), 0);
        assert_eq!(store.bucket_index(10), 1);
        assert_eq!(store.bucket_index(-9), 0);
        assert_eq!(store.bucket_index(-10), -1);
    }

    #[test]
    fn test_add_and_lookup() {
        let (a, b) = two_keys();
        let mut store = BucketStore::new(60).unwrap();
        store.add(a, "a", 0, 1.0);
        store.add(a, "a", 30, 3.0);
        store.add(b, "b", 61, 5.0);

        assert_eq!(store.timestamps(), vec![0, 1]);
        let first = store.get_bucket(10).unwrap();
        assert_eq!(first.value(a), Some(2.0));
        assert_eq!(first.value_by_shortcut("b"), None);
        assert_eq!(store.get_bucket(100).unwrap().value_by_shortcut("b"), Some(5.0));
        assert!(store.get_bucket(500).is_none());
    }

    #[test]
    fn test_status_without_points() {
        let (a, _) = two_keys();
        let mut store = BucketStore::new(60).unwrap();
        store.add_query_status(a, QueryStatus::warning("no data"));
        assert!(store.is_empty());
        assert_eq!(store.query_status(a).unwrap().message, "no data");
    }

    #[test]
    fn test_fill_only_gaps() {
        let (a, b) = two_keys();
        let mut store = BucketStore::new(60).unwrap();
        store.add(a, "a", 0, 1.0);
        store.add(b, "b", 60, 2.0);

        store.fill(a, "a", 1, 9.0);
        store.fill(a, "a", 0, 9.0);
        store.fill(a, "a", 7, 9.0);

        assert_eq!(store.get_bucket(0).unwrap().value(a), Some(1.0));
        let filled = store.get_bucket(60).unwrap();
        assert_eq!(filled.value(a), Some(9.0));
        assert!(filled.series(a).unwrap().is_interpolated());
        assert_eq!(filled.series(a).unwrap().points()[0].timestamp, 60);
        assert!(store.get_bucket(420).is_none());
    }

    #[test]
    fn test_shortcut_first_registration_wins() {
        let (a, b) = two_keys();
        let mut store = BucketStore::new(60).unwrap();
        store.add(a, "shared", 0, 1.0);
        store.add(b, "shared", 0, 2.0);
        assert_eq!(store.get_bucket(0).unwrap().value_by_shortcut("shared"), Some(1.0));
    }
}
