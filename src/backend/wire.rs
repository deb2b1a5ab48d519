//! JSON wire model of the backend query API
//!
//! Outbound, every specification becomes a single-subquery [`TsdbQuery`].
//! Inbound, a successful answer is a list of [`WireSeries`]; a failed one
//! carries an [`ErrorEnvelope`].
//!
//! Metric names and tag values may contain spaces, which the backend does
//! not accept. They travel with every space replaced by [`SPACE_SENTINEL`]
//! and are restored on the way back.
//!
//! # Example
//!
//! ```rust
//! use tsdb_gateway::backend::wire::SubQuery;
//! use tsdb_gateway::spec::MetricSpecification;
//!
//! let spec = MetricSpecification::for_metric("disk used").with_tag("host", "*");
//! let query = SubQuery::from_spec(&spec, None, false).unwrap();
//!
//! assert_eq!(query.metric, "disk__SPACE__used");
//! assert_eq!(query.tags.unwrap()["host"], "*");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SpecError;
use crate::spec::MetricSpecification;
use crate::tags::{TagSet, WILDCARD};
use crate::types::{DataPoint, QueryWindow};

/// Substitute for spaces in names sent to the backend
pub const SPACE_SENTINEL: &str = "__SPACE__";

/// Replace spaces by the sentinel
pub fn escape(name: &str) -> String {
    name.replace(' ', SPACE_SENTINEL)
}

/// Restore spaces replaced by [`escape`]
pub fn unescape(name: &str) -> String {
    name.replace(SPACE_SENTINEL, " ")
}

// ============================================================================
// Requests
// ============================================================================

/// Top-level query body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TsdbQuery {
    /// Start timestamp
    pub start: i64,

    /// End timestamp, omitted for "now"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,

    /// Sub-queries; the gateway always sends exactly one
    pub queries: Vec<SubQuery>,

    /// Millisecond timestamps in the answer
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ms_resolution: bool,
}

impl TsdbQuery {
    /// Query body for one sub-query over a window
    pub fn single(window: QueryWindow, query: SubQuery, ms_resolution: bool) -> Self {
        Self {
            start: window.start,
            end: window.end,
            queries: vec![query],
            ms_resolution,
        }
    }
}

/// Rate counter settings as the backend names them
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRateOptions {
    /// Counter semantics
    pub counter: bool,

    /// Counter wrap value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter_max: Option<i64>,

    /// Reset threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_value: Option<i64>,

    /// Drop rates computed across a reset
    pub drop_resets: bool,
}

/// Tag filter (filters mode)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFilter {
    /// Filter type: `wildcard` or `literal_or`
    #[serde(rename = "type")]
    pub kind: String,

    /// Tag key
    pub tagk: String,

    /// Filter expression
    pub filter: String,

    /// Split results per tag value
    pub group_by: bool,
}

impl WireFilter {
    fn for_pattern(tagk: &str, pattern: &str) -> Self {
        let kind = if pattern == WILDCARD {
            "wildcard"
        } else {
            "literal_or"
        };
        Self {
            kind: kind.to_string(),
            tagk: tagk.to_string(),
            filter: pattern.to_string(),
            group_by: true,
        }
    }
}

/// One backend sub-query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuery {
    /// Aggregator name
    pub aggregator: String,

    /// Escaped metric name
    pub metric: String,

    /// Downsample directive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downsample: Option<String>,

    /// Rate of change
    pub rate: bool,

    /// Counter settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_options: Option<WireRateOptions>,

    /// Tag patterns (tags mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,

    /// Tag filters (filters mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<WireFilter>>,
}

impl SubQuery {
    /// Build the sub-query of a fetched specification
    ///
    /// `downsample_override` replaces the specification's own downsample.
    /// With `use_filters` tag patterns are sent as filters instead of tags.
    pub fn from_spec(
        spec: &MetricSpecification,
        downsample_override: Option<&str>,
        use_filters: bool,
    ) -> Result<Self, SpecError> {
        let metric = spec
            .metric
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| SpecError::Invalid("fetched specification needs a metric".into()))?;

        let downsample = downsample_override
            .or(spec.downsample.as_deref())
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let rate_options = if spec.rate {
            spec.rate_options.as_ref().map(|opts| WireRateOptions {
                counter: opts.counter,
                counter_max: opts.counter_max,
                reset_value: opts.reset_threshold,
                drop_resets: opts.drop_resets(),
            })
        } else {
            None
        };

        let tag_set = spec.tag_set().map_values(escape);
        let (tags, filters) = if use_filters {
            let filters = tag_set
                .iter()
                .map(|(k, pattern)| WireFilter::for_pattern(k, pattern))
                .collect();
            (None, Some(filters))
        } else {
            let tags = tag_set
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            (Some(tags), None)
        };

        Ok(Self {
            aggregator: spec.aggregator.as_str().to_string(),
            metric: escape(metric),
            downsample,
            rate: spec.rate,
            rate_options,
            tags,
            filters,
        })
    }
}

// ============================================================================
// Responses
// ============================================================================

/// A data point value as the backend may encode it
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    /// Plain number
    Number(f64),
    /// `"NaN"`, `"Infinity"`, `"-Infinity"` or a quoted number
    Text(String),
    /// Missing value
    Null,
}

impl WireValue {
    /// Numeric value; `None` for a missing value
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            WireValue::Number(v) => Some(*v),
            WireValue::Text(text) => Some(match text.as_str() {
                "NaN" => f64::NAN,
                "Infinity" | "+Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                other => other.parse().unwrap_or(f64::NAN),
            }),
            WireValue::Null => None,
        }
    }
}

/// One series of a successful answer
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSeries {
    /// Escaped metric name
    pub metric: String,

    /// Concrete tags of the series
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Tag keys aggregated away
    #[serde(default)]
    pub aggregate_tags: Vec<String>,

    /// Timestamp to value
    #[serde(default)]
    pub dps: BTreeMap<i64, WireValue>,

    /// Underlying time series UIDs
    #[serde(default)]
    pub tsuids: Vec<String>,
}

impl WireSeries {
    /// Metric name with spaces restored
    pub fn metric_name(&self) -> String {
        unescape(&self.metric)
    }

    /// Tags with spaces restored in values
    pub fn tag_set(&self) -> TagSet {
        TagSet::from_pairs(self.tags.iter().map(|(k, v)| (k.clone(), unescape(v))))
    }

    /// Points in timestamp order, missing values skipped
    pub fn points(&self) -> Vec<DataPoint> {
        self.dps
            .iter()
            .filter_map(|(ts, value)| value.to_f64().map(|v| DataPoint::new(*ts, v)))
            .collect()
    }
}

/// Body of a failed answer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorEnvelope {
    /// Error details
    pub error: ErrorBody,
}

/// Error details reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    /// HTTP code echoed by the backend
    #[serde(default)]
    pub code: Option<u16>,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Extra detail, e.g. a stack trace
    #[serde(default)]
    pub details: Option<String>,
}

impl ErrorEnvelope {
    /// Extract the message of an error body, if it is an envelope
    pub fn message_of(body: &str) -> Option<String> {
        serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .map(|e| e.error.message)
            .filter(|m| !m.is_empty())
    }
}

// ============================================================================
// Administrative requests
// ============================================================================

/// Kind of UID an administrative call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UidKind {
    /// Metric names
    Metric,
    /// Tag keys
    Tagk,
    /// Tag values
    Tagv,
}

impl UidKind {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            UidKind::Metric => "metric",
            UidKind::Tagk => "tagk",
            UidKind::Tagv => "tagv",
        }
    }
}

impl fmt::Display for UidKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UidKind {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "metric" | "metrics" => Ok(UidKind::Metric),
            "tagk" => Ok(UidKind::Tagk),
            "tagv" => Ok(UidKind::Tagv),
            other => Err(SpecError::Invalid(format!("unknown uid kind: {}", other))),
        }
    }
}

/// Body of a UID rename request
pub fn rename_body(kind: UidKind, from: &str, to: &str) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert(kind.as_str().to_string(), serde_json::Value::from(escape(from)));
    body.insert("name".to_string(), serde_json::Value::from(escape(to)));
    serde_json::Value::Object(body)
}

/// Query parameters of a suggest request
pub fn suggest_params(kind: UidKind, prefix: &str, max: usize) -> Vec<(String, String)> {
    vec![
        ("type".to_string(), kind.as_str().to_string()),
        ("q".to_string(), escape(prefix)),
        ("max".to_string(), max.to_string()),
    ]
}
