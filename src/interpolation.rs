//! Gap filling over the bucket grid
//!
//! Series are grouped by their declared [`Interpolator`]; each non-trivial
//! group is filled in a single pass over the populated buckets of a
//! [`BucketStore`]. The pass runs before expression evaluation so derived
//! series see filled inputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::bucket::BucketStore;
use crate::error::SpecError;
use crate::key::KeyId;

/// Gap-filling policy of a specification
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Interpolator {
    /// Leave gaps empty
    #[default]
    None,
    /// Straight line between the nearest populated neighbours
    Linear,
    /// Fill every gap with 0
    Zero,
    /// Carry the last known value forward
    Previous,
}

impl Interpolator {
    /// Wire/DSL name
    pub fn as_str(&self) -> &'static str {
        match self {
            Interpolator::None => "none",
            Interpolator::Linear => "linear",
            Interpolator::Zero => "zero",
            Interpolator::Previous => "previous",
        }
    }

    /// Compute fill values for a single series
    ///
    /// `values` is the series laid over the populated grid (one slot per
    /// bucket, in index order). Returns `(slot, value)` for every gap this
    /// policy fills.
    pub fn fill(&self, indices: &[i64], values: &[Option<f64>]) -> Vec<(usize, f64)> {
        match self {
            Interpolator::None => Vec::new(),
            Interpolator::Zero => values
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_none())
                .map(|(slot, _)| (slot, 0.0))
                .collect(),
            Interpolator::Previous => {
                let mut filled = Vec::new();
                let mut last = None;
                for (slot, value) in values.iter().enumerate() {
                    match (value, last) {
                        (Some(v), _) => last = Some(*v),
                        (None, Some(prev)) => filled.push((slot, prev)),
                        (None, None) => {}
                    }
                }
                filled
            }
            Interpolator::Linear => linear_fill(indices, values),
        }
    }
}

fn linear_fill(indices: &[i64], values: &[Option<f64>]) -> Vec<(usize, f64)> {
    let mut filled = Vec::new();
    let mut left: Option<usize> = None;

    for (slot, value) in values.iter().enumerate() {
        if value.is_none() {
            continue;
        }
        if let Some(l) = left {
            if slot > l + 1 {
                let (x0, y0) = (indices[l] as f64, values[l].unwrap_or_default());
                let (x1, y1) = (indices[slot] as f64, values[slot].unwrap_or_default());
                for gap in (l + 1)..slot {
                    let x = indices[gap] as f64;
                    filled.push((gap, y0 + (y1 - y0) * (x - x0) / (x1 - x0)));
                }
            }
        }
        left = Some(slot);
    }
    filled
}

impl fmt::Display for Interpolator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interpolator {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Interpolator::None),
            "linear" => Ok(Interpolator::Linear),
            "zero" => Ok(Interpolator::Zero),
            "previous" => Ok(Interpolator::Previous),
            other => Err(SpecError::UnknownInterpolator(other.to_string())),
        }
    }
}

/// Groups series by policy and fills their gaps in one pass
#[derive(Debug, Default)]
pub struct InterpolationEngine {
    groups: BTreeMap<Interpolator, Vec<(KeyId, String)>>,
}

impl InterpolationEngine {
    /// Create an engine with no registered series
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a series under its policy; `None` is dropped
    pub fn register(&mut self, interpolator: Interpolator, key: KeyId, shortcut: &str) {
        if interpolator == Interpolator::None {
            return;
        }
        let group = self.groups.entry(interpolator).or_default();
        if !group.iter().any(|(k, _)| *k == key) {
            group.push((key, shortcut.to_string()));
        }
    }

    /// Number of registered series across all groups
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Whether nothing needs filling
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Fill gaps in place
    pub fn run(&self, store: &mut BucketStore) {
        if self.groups.is_empty() || store.is_empty() {
            return;
        }
        let indices = store.timestamps();

        for (interpolator, series) in &self.groups {
            let mut total = 0usize;
            for (key, shortcut) in series {
                let values: Vec<Option<f64>> = store
                    .series_values(*key)
                    .into_iter()
                    .map(|(_, value)| value)
                    .collect();
                for (slot, value) in interpolator.fill(&indices, &values) {
                    store.fill(*key, shortcut, indices[slot], value);
                    total += 1;
                }
            }
            debug!(
                interpolator = %interpolator,
                series = series.len(),
                filled = total,
                "Interpolation group complete"
            );
        }
    }
}
