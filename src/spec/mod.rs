//! Metric specifications
//!
//! A [`MetricSpecification`] is one client-requested series: a backend
//! metric with aggregator, optional downsample and rate semantics and tag
//! filters, or a *calculated* series defined by an RPN expression over other
//! series of the same request.
//!
//! Specifications arrive either decoded from JSON (serde, camelCase) or as
//! text in the specification DSL handled by [`parser`]:
//!
//! ```text
//! [aggregator:] [downsample:] [rate[{opts}]:] metric [{tag=val[|val2...],...}]
//! ```
//!
//! # Example
//!
//! ```rust
//! use tsdb_gateway::spec::MetricSpecification;
//!
//! let spec: MetricSpecification = "sum:rate{counter,,1000}:10m-avg:sys.cpu{host=web*|db1}"
//!     .parse()
//!     .unwrap();
//!
//! assert!(spec.rate);
//! // downsample is always written before rate
//! assert_eq!(spec.to_string(), "sum:10m-avg:rate{counter,,1000}:sys.cpu{host=web*|db1}");
//! ```

pub mod parser;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SpecError;
use crate::interpolation::Interpolator;
use crate::tags::TagSet;

pub use parser::{parse_specification, validate_downsample};

// ============================================================================
// Aggregator
// ============================================================================

/// Backend aggregation function applied across series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    /// Arithmetic mean
    #[default]
    Avg,
    /// Sum with linear interpolation
    Sum,
    /// Minimum with linear interpolation
    Min,
    /// Maximum with linear interpolation
    Max,
    /// Standard deviation
    Dev,
    /// Number of data points
    Count,
    /// Sum treating missing values as zero
    Zimsum,
    /// Minimum without interpolation
    Mimmin,
    /// Maximum without interpolation
    Mimmax,
    /// First value
    First,
    /// Last value
    Last,
    /// No aggregation (every series returned as-is)
    None,
    /// 50th percentile
    P50,
    /// 75th percentile
    P75,
    /// 90th percentile
    P90,
    /// 95th percentile
    P95,
    /// 99th percentile
    P99,
    /// 99.9th percentile
    P999,
}

impl Aggregator {
    /// Wire and DSL name
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregator::Avg => "avg",
            Aggregator::Sum => "sum",
            Aggregator::Min => "min",
            Aggregator::Max => "max",
            Aggregator::Dev => "dev",
            Aggregator::Count => "count",
            Aggregator::Zimsum => "zimsum",
            Aggregator::Mimmin => "mimmin",
            Aggregator::Mimmax => "mimmax",
            Aggregator::First => "first",
            Aggregator::Last => "last",
            Aggregator::None => "none",
            Aggregator::P50 => "p50",
            Aggregator::P75 => "p75",
            Aggregator::P90 => "p90",
            Aggregator::P95 => "p95",
            Aggregator::P99 => "p99",
            Aggregator::P999 => "p999",
        }
    }
}

impl FromStr for Aggregator {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let agg = match s.trim().to_ascii_lowercase().as_str() {
            "avg" => Aggregator::Avg,
            "sum" => Aggregator::Sum,
            "min" => Aggregator::Min,
            "max" => Aggregator::Max,
            "dev" => Aggregator::Dev,
            "count" => Aggregator::Count,
            "zimsum" => Aggregator::Zimsum,
            "mimmin" => Aggregator::Mimmin,
            "mimmax" => Aggregator::Mimmax,
            "first" => Aggregator::First,
            "last" => Aggregator::Last,
            "none" => Aggregator::None,
            "p50" => Aggregator::P50,
            "p75" => Aggregator::P75,
            "p90" => Aggregator::P90,
            "p95" => Aggregator::P95,
            "p99" => Aggregator::P99,
            "p999" => Aggregator::P999,
            _ => return Err(SpecError::UnknownAggregator(s.to_string())),
        };
        Ok(agg)
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Rate Options
// ============================================================================

/// Counter wrap-around handling for rate queries
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateOptions {
    /// Values are monotonically increasing counters
    #[serde(default)]
    pub counter: bool,

    /// Maximum counter value before wrapping
    #[serde(default)]
    pub counter_max: Option<i64>,

    /// Rates above this threshold are treated as counter resets
    #[serde(default)]
    pub reset_threshold: Option<i64>,

    /// Explicit drop-resets flag; see [`RateOptions::drop_resets`]
    #[serde(default)]
    pub drop_resets: Option<bool>,
}

impl RateOptions {
    /// Counter options with the given bounds
    pub fn counter(counter_max: Option<i64>, reset_threshold: Option<i64>) -> Self {
        Self {
            counter: true,
            counter_max,
            reset_threshold,
            drop_resets: None,
        }
    }

    /// Effective drop-resets flag
    ///
    /// Defaults to true only when neither a counter max nor a reset
    /// threshold is set, unless given explicitly.
    pub fn drop_resets(&self) -> bool {
        self.drop_resets
            .unwrap_or(self.counter_max.is_none() && self.reset_threshold.is_none())
    }
}

impl fmt::Display for RateOptions {
    /// Canonical `counter[,counterMax][,resetThreshold]`, empty trailing
    /// fields dropped
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("counter")?;
        match (self.counter_max, self.reset_threshold) {
            (Some(max), Some(reset)) => write!(f, ",{},{}", max, reset),
            (Some(max), None) => write!(f, ",{}", max),
            (None, Some(reset)) => write!(f, ",,{}", reset),
            (None, None) => Ok(()),
        }
    }
}

// ============================================================================
// Metric Specification
// ============================================================================

/// One client-requested series definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpecification {
    /// Aggregation function
    #[serde(default)]
    pub aggregator: Aggregator,

    /// Backend metric name; absent for calculated series
    #[serde(default)]
    pub metric: Option<String>,

    /// Client-facing alias
    #[serde(default)]
    pub name: Option<String>,

    /// Client-facing identifier, also the expression shortcut when set
    #[serde(default)]
    pub id: Option<String>,

    /// Downsample directive, e.g. `10s-avg`
    #[serde(default)]
    pub downsample: Option<String>,

    /// Ask the backend for the rate of change
    #[serde(default)]
    pub rate: bool,

    /// Counter handling for rate queries
    #[serde(default)]
    pub rate_options: Option<RateOptions>,

    /// Tag key to OR-ed value list
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<String>>,

    /// Gap filling policy
    #[serde(default)]
    pub interpolator: Interpolator,

    /// Postfix expression; when non-empty the series is calculated
    #[serde(default)]
    pub expression: Option<String>,

    /// Whether the series appears in the final output
    #[serde(default = "default_emit")]
    pub emit: bool,
}

fn default_emit() -> bool {
    true
}

impl Default for MetricSpecification {
    fn default() -> Self {
        Self {
            aggregator: Aggregator::default(),
            metric: None,
            name: None,
            id: None,
            downsample: None,
            rate: false,
            rate_options: None,
            tags: BTreeMap::new(),
            interpolator: Interpolator::default(),
            expression: None,
            emit: true,
        }
    }
}

impl MetricSpecification {
    /// Specification for a backend metric with default settings
    pub fn for_metric(metric: impl Into<String>) -> Self {
        Self {
            metric: Some(metric.into()),
            ..Default::default()
        }
    }

    /// Calculated specification evaluating `expression`
    pub fn calculated(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            expression: Some(expression.into()),
            ..Default::default()
        }
    }

    /// Set the identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the alias
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a tag value (OR-ed with existing values of the same key)
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Set the interpolator
    pub fn with_interpolator(mut self, interpolator: Interpolator) -> Self {
        self.interpolator = interpolator;
        self
    }

    /// Hide the series from output
    pub fn hidden(mut self) -> Self {
        self.emit = false;
        self
    }

    /// Metric if set, otherwise name
    pub fn metric_or_name(&self) -> Option<&str> {
        non_empty(&self.metric).or_else(|| non_empty(&self.name))
    }

    /// Name if set, otherwise metric
    pub fn name_or_metric(&self) -> Option<&str> {
        non_empty(&self.name).or_else(|| non_empty(&self.metric))
    }

    /// Whether the series is derived from an expression
    pub fn is_calculated(&self) -> bool {
        self.expression
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty())
    }

    /// Tag filters as pattern set
    pub fn tag_set(&self) -> TagSet {
        TagSet::from_value_lists(&self.tags)
    }

    /// Check semantic validity of a decoded specification
    pub fn validate(&self) -> Result<(), SpecError> {
        if !self.is_calculated() && non_empty(&self.metric).is_none() {
            return Err(SpecError::Invalid(
                "metric is required unless an expression is given".to_string(),
            ));
        }
        if self.metric_or_name().is_none() {
            return Err(SpecError::Invalid(
                "calculated series needs a name or metric".to_string(),
            ));
        }
        if let Some(ds) = non_empty(&self.downsample) {
            validate_downsample(ds)?;
        }
        for (key, values) in &self.tags {
            if key.is_empty() || values.iter().any(|v| v.is_empty()) {
                return Err(SpecError::Invalid(format!("empty tag key or value for '{}'", key)));
            }
        }
        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

impl FromStr for MetricSpecification {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_specification(s)
    }
}

impl fmt::Display for MetricSpecification {
    /// Canonical DSL form: `aggregator:[downsample:][rate[{opts}]:]metric[{tags}]`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.aggregator)?;
        if let Some(ds) = non_empty(&self.downsample) {
            write!(f, "{}:", ds)?;
        }
        if self.rate {
            f.write_str("rate")?;
            if let Some(opts) = self.rate_options.as_ref().filter(|o| o.counter) {
                write!(f, "{{{}}}", opts)?;
            }
            f.write_str(":")?;
        }
        f.write_str(self.metric_or_name().unwrap_or_default())?;
        let tags = self.tag_set();
        if !tags.is_empty() {
            write!(f, "{{{}}}", tags)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_on_decode() {
        let spec: MetricSpecification = serde_json::from_str(r#"{"metric":"sys.cpu"}"#).unwrap();
        assert_eq!(spec.aggregator, Aggregator::Avg);
        assert_eq!(spec.interpolator, Interpolator::None);
        assert!(spec.emit);
        assert!(spec.tags.is_empty());
    }

    #[test]
    fn test_metric_and_name_precedence() {
        let spec = MetricSpecification::for_metric("m").with_name("n");
        assert_eq!(spec.metric_or_name(), Some("m"));
        assert_eq!(spec.name_or_metric(), Some("n"));

        let calc = MetricSpecification::calculated("total", "a,b,+");
        assert_eq!(calc.metric_or_name(), Some("total"));
        assert!(calc.is_calculated());
    }

    #[test]
    fn test_blank_expression_is_not_calculated() {
        let mut spec = MetricSpecification::for_metric("m");
        spec.expression = Some("  ".to_string());
        assert!(!spec.is_calculated());
    }

    #[test]
    fn test_validate_requires_metric() {
        let spec = MetricSpecification::default().with_name("alias");
        assert!(matches!(spec.validate(), Err(SpecError::Invalid(_))));
        assert!(MetricSpecification::calculated("x", "1").validate().is_ok());
    }

    #[test]
    fn test_drop_resets_default() {
        assert!(RateOptions::counter(None, None).drop_resets());
        assert!(!RateOptions::counter(Some(100), None).drop_resets());
        assert!(!RateOptions::counter(None, Some(5)).drop_resets());

        let explicit = RateOptions {
            drop_resets: Some(true),
            ..RateOptions::counter(Some(100), None)
        };
        assert!(explicit.drop_resets());
    }

    #[test]
    fn test_rate_options_display() {
        assert_eq!(RateOptions::counter(None, None).to_string(), "counter");
        assert_eq!(RateOptions::counter(Some(10), None).to_string(), "counter,10");
        assert_eq!(RateOptions::counter(None, Some(5)).to_string(), "counter,,5");
        assert_eq!(RateOptions::counter(Some(10), Some(5)).to_string(), "counter,10,5");
    }

    #[test]
    fn test_aggregator_names() {
        assert_eq!("SUM".parse::<Aggregator>().unwrap(), Aggregator::Sum);
        assert_eq!(Aggregator::P999.to_string(), "p999");
        assert!("median".parse::<Aggregator>().is_err());
    }
}
