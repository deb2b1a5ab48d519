//! Query orchestration
//!
//! [`ResultProcessor::process`] runs one pass over a [`MetricQuery`] in
//! strictly ordered phases:
//!
//! 1. **Keys**: every specification gets a [`MetricKey`]; calculated
//!    specifications are set aside for evaluation.
//! 2. **Fetch**: fetched specifications fan out to the backend; each
//!    returned series is resolved through the key cache and its points land
//!    in the [`BucketStore`].
//! 3. **Interpolate**: gaps are filled per interpolator group.
//! 4. **Evaluate**: each calculated specification is evaluated bucket by
//!    bucket, in specification order, and written back to the store.
//!
//! The key cache and the bucket store are owned by the pass; fan-out
//! workers only hand back immutable results that are folded in here.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::bucket::{Bucket, BucketStore};
use crate::error::{ExpressionError, Result, SpecError};
use crate::fanout::{FanoutExecutor, SeriesResult, STATUS_OK};
use crate::interpolation::InterpolationEngine;
use crate::key::{KeyId, MetricKey, MetricKeyCache};
use crate::rpn::{CompiledExpression, EvaluationScope, RpnCalculator};
use crate::spec::{validate_downsample, MetricSpecification};
use crate::types::{QueryStatus, QueryWindow};

/// A client request: a time window plus specifications
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricQuery {
    /// Start timestamp
    pub start: i64,

    /// End timestamp; `None` means now
    #[serde(default)]
    pub end: Option<i64>,

    /// Downsample applied to every fetched specification
    #[serde(default)]
    pub downsample: Option<String>,

    /// Bucket width in seconds; defaults to the configured size
    #[serde(default)]
    pub bucket_size: Option<i64>,

    /// Requested series, fetched and calculated
    #[serde(default)]
    pub specs: Vec<MetricSpecification>,
}

impl MetricQuery {
    /// Query from `start` until now
    pub fn new(start: i64, specs: Vec<MetricSpecification>) -> Self {
        Self {
            start,
            specs,
            ..Default::default()
        }
    }

    /// Time window of the query
    pub fn window(&self) -> QueryWindow {
        QueryWindow {
            start: self.start,
            end: self.end,
        }
    }

    /// Check the request before any backend call
    pub fn validate(&self) -> std::result::Result<(), SpecError> {
        if let Some(end) = self.end {
            if end < self.start {
                return Err(SpecError::Invalid(format!(
                    "end {} is before start {}",
                    end, self.start
                )));
            }
        }
        if let Some(size) = self.bucket_size {
            if size <= 0 {
                return Err(SpecError::Invalid(format!("bucket size must be > 0, got {}", size)));
            }
        }
        if let Some(ds) = self.downsample.as_deref().filter(|d| !d.is_empty()) {
            validate_downsample(ds)?;
        }
        self.specs.iter().try_for_each(MetricSpecification::validate)
    }
}

/// Result of one processing pass
#[derive(Debug)]
pub struct QueryOutcome {
    /// Specifications in request order, hidden ones included
    pub specs: Vec<MetricSpecification>,

    /// Key of each specification, by position
    pub spec_keys: Vec<KeyId>,

    /// Every key of the pass
    pub keys: MetricKeyCache,

    /// Populated bucket grid and per-key status
    pub buckets: BucketStore,

    /// Output series as `(spec index, key)`, one per specification in order
    pub series: Vec<(usize, KeyId)>,
}

impl QueryOutcome {
    /// Status recorded for a key
    pub fn status(&self, key: KeyId) -> Option<&QueryStatus> {
        self.buckets.query_status(key)
    }
}

/// Bucket-scoped view handed to the calculator
struct BucketScope<'a> {
    bucket: &'a Bucket,
}

impl EvaluationScope for BucketScope<'_> {
    fn timestamp(&self) -> i64 {
        self.bucket.timestamp()
    }

    fn lookup_by_shortcut(&self, name: &str) -> Option<f64> {
        self.bucket.value_by_shortcut(name)
    }
}

/// Runs processing passes against a fan-out executor
#[derive(Debug)]
pub struct ResultProcessor<'a> {
    executor: &'a FanoutExecutor,
    bucket_size: i64,
    calculator: RpnCalculator,
}

impl<'a> ResultProcessor<'a> {
    /// Processor using `bucket_size` when a query does not set one
    pub fn new(executor: &'a FanoutExecutor, bucket_size: i64) -> Self {
        Self {
            executor,
            bucket_size,
            calculator: RpnCalculator::new(),
        }
    }

    /// Replace the calculator, e.g. to install a custom reference resolver
    pub fn with_calculator(mut self, calculator: RpnCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    /// Run one pass
    pub fn process(&self, query: &MetricQuery) -> Result<QueryOutcome> {
        query.validate()?;

        let mut buckets = BucketStore::new(query.bucket_size.unwrap_or(self.bucket_size))?;
        let mut keys = MetricKeyCache::new();
        let mut interpolation = InterpolationEngine::new();

        // Phase 1: keys
        let spec_keys: Vec<KeyId> = query
            .specs
            .iter()
            .map(|spec| keys.put(MetricKey::from_spec(spec)))
            .collect();
        let (calculated, fetched): (Vec<usize>, Vec<usize>) =
            (0..query.specs.len()).partition(|&i| query.specs[i].is_calculated());

        debug!(
            fetched = fetched.len(),
            calculated = calculated.len(),
            bucket_size = buckets.bucket_size(),
            "Processing query"
        );

        // Phase 2: fetch and ingest
        let fetch_specs: Vec<MetricSpecification> =
            fetched.iter().map(|&i| query.specs[i].clone()).collect();
        let results = self.executor.fetch(
            query.window(),
            query.downsample.as_deref().filter(|d| !d.is_empty()),
            &fetch_specs,
        );

        let mut series = Vec::new();
        for result in results {
            let spec_index = fetched[result.spec_index];
            let spec = &query.specs[spec_index];
            ingest(
                result,
                spec,
                spec_keys[spec_index],
                &keys,
                &mut buckets,
                &mut interpolation,
            );
            series.push((spec_index, spec_keys[spec_index]));
        }

        // Phase 3: interpolate
        interpolation.run(&mut buckets);

        // Phase 4: evaluate
        for &spec_index in &calculated {
            let key = spec_keys[spec_index];
            let status = self.evaluate(&query.specs[spec_index], key, &keys, &mut buckets);
            buckets.add_query_status(key, status);
            series.push((spec_index, key));
        }

        series.sort_by_key(|(spec_index, _)| *spec_index);

        info!(
            specs = query.specs.len(),
            series = series.len(),
            buckets = buckets.len(),
            "Query processed"
        );

        Ok(QueryOutcome {
            specs: query.specs.clone(),
            spec_keys,
            keys,
            buckets,
            series,
        })
    }

    fn evaluate(
        &self,
        spec: &MetricSpecification,
        key: KeyId,
        keys: &MetricKeyCache,
        buckets: &mut BucketStore,
    ) -> QueryStatus {
        let source = spec.expression.as_deref().unwrap_or_default();
        let expression = match CompiledExpression::compile(source) {
            Ok(expression) => expression,
            Err(e) => {
                warn!(expression = source, error = %e, "Invalid expression");
                return QueryStatus::error(e.to_string());
            }
        };
        debug!(
            expression = source,
            references = ?expression.references().collect::<Vec<_>>(),
            "Evaluating calculated series"
        );

        let mut values = Vec::new();
        let mut failure = None;
        for bucket in buckets.buckets() {
            match self.calculator.evaluate(&expression, &BucketScope { bucket }) {
                Ok(value) => values.push((bucket.timestamp(), value)),
                Err(ExpressionError::UnknownReference(name)) => {
                    trace!(reference = %name, bucket = bucket.index(), "Skipping bucket");
                }
                Err(e) => {
                    warn!(
                        expression = source,
                        bucket = bucket.index(),
                        error = %e,
                        "Evaluation failed"
                    );
                    failure = Some(e);
                    break;
                }
            }
        }

        // a failed series keeps none of its values
        if let Some(e) = failure {
            return QueryStatus::error(e.to_string());
        }

        let shortcut = keys.key(key).shortcut().to_string();
        if values.is_empty() {
            return QueryStatus::warning("expression produced no values");
        }
        for (timestamp, value) in values {
            buckets.add(key, &shortcut, timestamp, value);
        }
        QueryStatus::success(STATUS_OK)
    }
}

/// Fold one fetch result into the pass
///
/// Each returned series is resolved through the key cache by the
/// specification's identity and the series' concrete tags. Every series a
/// wildcard specification returns resolves to that specification's key, so
/// its bucket value is the mean over all of them. A series no key accepts
/// lands on the specification key.
fn ingest(
    result: SeriesResult,
    spec: &MetricSpecification,
    spec_key: KeyId,
    keys: &MetricKeyCache,
    buckets: &mut BucketStore,
    interpolation: &mut InterpolationEngine,
) {
    buckets.add_query_status(spec_key, result.status);

    let parent = keys.key(spec_key);
    for fetched in result.series {
        let key = keys
            .get(
                &parent.metric,
                Some(parent.name.as_str()),
                parent.id.as_deref(),
                Some(&fetched.tags),
            )
            .unwrap_or_else(|| {
                debug!(
                    metric = %fetched.metric,
                    tags = %fetched.tags,
                    "No key accepts series, using specification key"
                );
                spec_key
            });

        let shortcut = keys.key(key).shortcut();
        interpolation.register(spec.interpolator, key, shortcut);
        buckets.add_all(key, shortcut, &fetched.points);

        trace!(
            metric = %fetched.metric,
            tags = %fetched.tags,
            points = fetched.points.len(),
            "Series ingested"
        );
    }
}
