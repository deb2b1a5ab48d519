//! Result writer
//!
//! Flattens a [`QueryOutcome`] into one [`SeriesOutput`] per emitted
//! series. Specifications with `emit = false` took part in evaluation but
//! are dropped here.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::processor::QueryOutcome;
use crate::tags::TagSet;
use crate::types::QueryStatus;

/// One series of the final answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesOutput {
    /// Display name
    pub name: String,

    /// Metric name
    pub metric: String,

    /// Client identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Requested tag patterns
    pub tags: TagSet,

    /// Outcome of the sub-query or evaluation
    pub status: QueryStatus,

    /// Bucket start timestamp to value
    pub dps: BTreeMap<i64, f64>,
}

/// Build the output list, one entry per emitted series in request order
pub fn write_series(outcome: &QueryOutcome) -> Vec<SeriesOutput> {
    outcome
        .series
        .iter()
        .filter(|(spec_index, _)| outcome.specs[*spec_index].emit)
        .map(|&(_, key_id)| {
            let key = outcome.keys.key(key_id);
            let dps = outcome
                .buckets
                .buckets()
                .filter_map(|bucket| bucket.value(key_id).map(|v| (bucket.timestamp(), v)))
                .collect();

            SeriesOutput {
                name: key.name.clone(),
                metric: key.metric.clone(),
                id: key.id.clone(),
                tags: key.tags.clone(),
                status: outcome
                    .status(key_id)
                    .cloned()
                    .unwrap_or_else(|| QueryStatus::warning("no status recorded")),
                dps,
            }
        })
        .collect()
}
