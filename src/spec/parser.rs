//! Specification DSL parser
//!
//! Parses the colon-separated specification text into a
//! [`MetricSpecification`]:
//!
//! ```text
//! [aggregator:] [downsample:] [rate[{counter[,[counterMax][,resetThreshold]]}]:] metric [{k=v[|v2...],...}]
//! ```
//!
//! Input order of downsample and rate is flexible; serialization (the
//! `Display` impl of `MetricSpecification`) always writes downsample first.
//! Re-parsing a serialized specification is therefore a fixed point, while
//! the first serialization of non-canonical input is not a literal echo.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_till1},
    character::complete::{alpha1, alphanumeric1, char, digit1},
    combinator::{all_consuming, opt, recognize},
    multi::{many1, separated_list1},
    sequence::{delimited, preceded},
    IResult, Parser,
};
use std::collections::BTreeMap;

use super::{Aggregator, MetricSpecification, RateOptions};
use crate::error::SpecError;
use crate::tags::TagSet;

/// Maximum number of colon-separated terms
pub const MAX_TERMS: usize = 4;

/// Time units accepted in downsample intervals
const DOWNSAMPLE_UNITS: &[&str] = &["ms", "s", "m", "h", "d", "w", "n", "y"];

/// Fill policies accepted as downsample suffix
const DOWNSAMPLE_FILLS: &[&str] = &["none", "nan", "null", "zero"];

/// Parse a specification from its DSL text
///
/// # Errors
///
/// - [`SpecError::Parse`] for a malformed term structure (more than four
///   terms, empty terms, stray braces, unexpected third term, bad tag block)
/// - [`SpecError::UnknownAggregator`] for an unknown first term
/// - [`SpecError::RateFormat`] for malformed `rate{...}` options
/// - [`SpecError::InvalidDownsample`] for a malformed downsample term
pub fn parse_specification(text: &str) -> Result<MetricSpecification, SpecError> {
    let text = text.trim();
    let terms = split_terms(text)?;

    if terms.len() > MAX_TERMS {
        return Err(SpecError::Parse(format!(
            "expected at most {} terms, got {} in '{}'",
            MAX_TERMS,
            terms.len(),
            text
        )));
    }

    let (last, _) = terms
        .split_last()
        .ok_or_else(|| SpecError::Parse(format!("empty specification '{}'", text)))?;

    let (metric, tags) = parse_metric_term(last)?;
    let mut spec = MetricSpecification {
        metric: Some(metric),
        tags,
        ..Default::default()
    };

    if terms.len() > 1 {
        spec.aggregator = terms[0].trim().parse::<Aggregator>()?;
    }

    if terms.len() > 2 {
        let second = terms[1].trim();
        if second.starts_with("rate") {
            spec.rate = true;
            spec.rate_options = parse_rate_term(second)?;
            if terms.len() == MAX_TERMS {
                spec.downsample = Some(parse_downsample_term(terms[2])?);
            }
        } else {
            spec.downsample = Some(parse_downsample_term(second)?);
            if terms.len() == MAX_TERMS {
                let third = terms[2].trim();
                if !third.starts_with("rate") {
                    return Err(SpecError::Parse(format!(
                        "unexpected term '{}', expected a rate term",
                        third
                    )));
                }
                spec.rate = true;
                spec.rate_options = parse_rate_term(third)?;
            }
        }
    }

    Ok(spec)
}

/// Parse the body of a `rate{...}` block
///
/// Grammar: `counter[,[counterMax][,resetThreshold]]`.
pub fn parse_rate_options(body: &str) -> Result<RateOptions, SpecError> {
    if body.trim().is_empty() {
        return Err(SpecError::RateFormat("rate options must not be empty".to_string()));
    }

    let fields: Vec<&str> = body.split(',').map(str::trim).collect();
    if fields.len() > 3 {
        return Err(SpecError::RateFormat(format!(
            "too many options in '{}', expected at most 3",
            body
        )));
    }
    if fields[0] != "counter" {
        return Err(SpecError::RateFormat(
            "first option must be value 'counter'".to_string(),
        ));
    }

    let counter_max = parse_counter_field(fields.get(1).copied(), "counterMax")?;
    let reset_threshold = parse_counter_field(fields.get(2).copied(), "resetThreshold")?;

    Ok(RateOptions::counter(counter_max, reset_threshold))
}

/// Check a downsample directive: `<n><unit>-<agg>[-<fill>]` or `0all-<agg>`
pub fn validate_downsample(downsample: &str) -> Result<(), SpecError> {
    let invalid = |reason: &str| {
        SpecError::InvalidDownsample(format!("'{}': {}", downsample, reason))
    };

    let (_, (count, unit, agg, fill)) = all_consuming(downsample_directive)
        .parse(downsample)
        .map_err(|_| invalid("expected <interval>-<aggregator>[-<fill>]"))?;

    let all_window = unit == "all" && count == "0";
    if !all_window {
        // a trailing `c` aligns the interval to calendar boundaries
        let base = unit.strip_suffix('c').unwrap_or(unit);
        if !DOWNSAMPLE_UNITS.contains(&base) {
            return Err(invalid("unknown time unit"));
        }
        if count.parse::<u64>().map_or(true, |n| n == 0) {
            return Err(invalid("interval must be positive"));
        }
    }

    if agg.parse::<Aggregator>().is_err() && all_consuming(percentile).parse(agg).is_err() {
        return Err(invalid("unknown aggregator"));
    }

    if let Some(fill) = fill {
        if !DOWNSAMPLE_FILLS.contains(&fill) {
            return Err(invalid("unknown fill policy"));
        }
    }

    Ok(())
}

// ============================================================================
// Term Splitting
// ============================================================================

/// A `{...}` block, kept verbatim so colons inside it do not split terms
fn braced(input: &str) -> IResult<&str, &str> {
    recognize((char('{'), opt(is_not("}")), char('}'))).parse(input)
}

/// One non-empty term
fn term(input: &str) -> IResult<&str, &str> {
    recognize(many1(alt((is_not(":{}"), braced)))).parse(input)
}

fn split_terms(text: &str) -> Result<Vec<&str>, SpecError> {
    all_consuming(separated_list1(char(':'), term))
        .parse(text)
        .map(|(_, terms)| terms)
        .map_err(|_| SpecError::Parse(format!("malformed specification '{}'", text)))
}

// ============================================================================
// Metric and Tags
// ============================================================================

/// Metric name followed by an optional tag block
fn metric_with_tags(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    (
        take_till1(|c: char| c == '{'),
        opt(delimited(char('{'), recognize(opt(is_not("}"))), char('}'))),
    )
        .parse(input)
}

fn parse_metric_term(
    term: &str,
) -> Result<(String, BTreeMap<String, Vec<String>>), SpecError> {
    let (_, (metric, tag_block)) = all_consuming(metric_with_tags)
        .parse(term.trim())
        .map_err(|_| SpecError::Parse(format!("malformed metric term '{}'", term)))?;

    let metric = metric.trim();
    if metric.is_empty() {
        return Err(SpecError::Parse("metric name must not be empty".to_string()));
    }

    let tags = match tag_block {
        Some(body) => parse_tag_block(body)?,
        None => TagSet::new(),
    };

    Ok((metric.to_string(), tags.to_value_lists()))
}

/// Parse `k=v,k2=v2|v3`; alternatives stay joined as one pattern
fn parse_tag_block(body: &str) -> Result<TagSet, SpecError> {
    let mut tags = TagSet::new();
    for pair in body.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| SpecError::Parse(format!("tag '{}' is missing '='", pair)))?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(SpecError::Parse(format!("tag '{}' has an empty key or value", pair)));
        }
        tags.insert(key, value);
    }
    Ok(tags)
}

// ============================================================================
// Rate and Downsample Terms
// ============================================================================

/// `rate` with an optional `{...}` option block
fn rate_term(input: &str) -> IResult<&str, Option<&str>> {
    preceded(
        tag("rate"),
        opt(delimited(char('{'), recognize(opt(is_not("}"))), char('}'))),
    )
    .parse(input)
}

fn parse_rate_term(term: &str) -> Result<Option<RateOptions>, SpecError> {
    match all_consuming(rate_term).parse(term) {
        Ok((_, None)) => Ok(None),
        Ok((_, Some(body))) => parse_rate_options(body).map(Some),
        Err(_) => Err(SpecError::RateFormat(format!("malformed rate term '{}'", term))),
    }
}

fn parse_counter_field(field: Option<&str>, name: &str) -> Result<Option<i64>, SpecError> {
    match field.filter(|f| !f.is_empty()) {
        None => Ok(None),
        Some(value) => value.parse::<i64>().map(Some).map_err(|_| {
            SpecError::RateFormat(format!("{} must be a 64-bit integer, got '{}'", name, value))
        }),
    }
}

/// `<count><unit>-<agg>[-<fill>]`
fn downsample_directive(input: &str) -> IResult<&str, (&str, &str, &str, Option<&str>)> {
    (
        digit1,
        alpha1,
        preceded(char('-'), alphanumeric1),
        opt(preceded(char('-'), alpha1)),
    )
        .parse(input)
}

/// Percentile aggregator beyond the fixed set: `p<n>` or estimated `ep<n>r<m>`
fn percentile(input: &str) -> IResult<&str, &str> {
    alt((
        recognize((char('p'), digit1)),
        recognize((tag("ep"), digit1, char('r'), digit1)),
    ))
    .parse(input)
}

fn parse_downsample_term(term: &str) -> Result<String, SpecError> {
    let term = term.trim();
    validate_downsample(term)?;
    Ok(term.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_only() {
        let spec = parse_specification("sys.cpu.user").unwrap();
        assert_eq!(spec.metric.as_deref(), Some("sys.cpu.user"));
        assert_eq!(spec.aggregator, Aggregator::Avg);
        assert!(!spec.rate);
        assert!(spec.downsample.is_none());
        assert!(spec.tags.is_empty());
    }

    #[test]
    fn test_aggregator_and_tags() {
        let spec = parse_specification("sum:sys.cpu{host=web01|web02,dc=*}").unwrap();
        assert_eq!(spec.aggregator, Aggregator::Sum);
        assert_eq!(spec.tags["host"], vec!["web01", "web02"]);
        assert_eq!(spec.tags["dc"], vec!["*"]);
    }

    #[test]
    fn test_unknown_aggregator() {
        let err = parse_specification("median:sys.cpu").unwrap_err();
        assert_eq!(err, SpecError::UnknownAggregator("median".to_string()));
    }

    #[test]
    fn test_three_terms_downsample() {
        let spec = parse_specification("max:1h-max:sys.mem").unwrap();
        assert_eq!(spec.downsample.as_deref(), Some("1h-max"));
        assert!(!spec.rate);
    }

    #[test]
    fn test_three_terms_rate() {
        let spec = parse_specification("sum:rate:net.bytes").unwrap();
        assert!(spec.rate);
        assert!(spec.rate_options.is_none());
        assert!(spec.downsample.is_none());
    }

    #[test]
    fn test_four_terms_either_order() {
        let a = parse_specification("sum:rate{counter}:5m-avg:net.bytes").unwrap();
        let b = parse_specification("sum:5m-avg:rate{counter}:net.bytes").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.downsample.as_deref(), Some("5m-avg"));
        assert_eq!(a.rate_options, Some(RateOptions::counter(None, None)));
    }

    #[test]
    fn test_four_terms_without_rate_is_error() {
        let err = parse_specification("sum:5m-avg:1h-max:net.bytes").unwrap_err();
        assert!(matches!(err, SpecError::Parse(_)));
    }

    #[test]
    fn test_too_many_terms() {
        let err = parse_specification("sum:5m-avg:rate:x:net.bytes").unwrap_err();
        assert!(matches!(err, SpecError::Parse(_)));
    }

    #[test]
    fn test_empty_term_is_error() {
        assert!(parse_specification("sum::net.bytes").is_err());
        assert!(parse_specification("").is_err());
        assert!(parse_specification("sum:").is_err());
    }

    #[test]
    fn test_invalid_downsample() {
        let err = parse_specification("sum:soon:net.bytes").unwrap_err();
        assert!(matches!(err, SpecError::InvalidDownsample(_)));
        assert!(validate_downsample("0all-sum").is_ok());
        assert!(validate_downsample("10s-avg-zero").is_ok());
        assert!(validate_downsample("10q-avg").is_err());
        assert!(validate_downsample("0m-avg").is_err());
        assert!(validate_downsample("1m-pct").is_err());
        assert!(validate_downsample("1c-avg").is_err());
    }

    #[test]
    fn test_calendar_and_percentile_downsample() {
        assert!(validate_downsample("1dc-avg").is_ok());
        assert!(validate_downsample("1hc-sum-zero").is_ok());
        assert!(validate_downsample("1m-ep95r3").is_ok());
        assert!(validate_downsample("5m-p85").is_ok());
        assert!(validate_downsample("1m-ep95").is_err());

        let spec: MetricSpecification = "sum:1dc-ep99r7:sys.cpu".parse().unwrap();
        assert_eq!(spec.downsample.as_deref(), Some("1dc-ep99r7"));
    }

    #[test]
    fn test_rate_options_full() {
        let spec =
            parse_specification("avg:rate{counter,9223372036854775807,2000}:m").unwrap();
        let opts = spec.rate_options.unwrap();
        assert_eq!(opts.counter_max, Some(i64::MAX));
        assert_eq!(opts.reset_threshold, Some(2000));
        assert!(!opts.drop_resets());
    }

    #[test]
    fn test_rate_options_errors() {
        assert_eq!(
            parse_rate_options("gauge").unwrap_err(),
            SpecError::RateFormat("first option must be value 'counter'".to_string())
        );
        assert!(matches!(parse_rate_options(""), Err(SpecError::RateFormat(_))));
        assert!(matches!(
            parse_rate_options("counter,1,2,3"),
            Err(SpecError::RateFormat(_))
        ));
        let err = parse_rate_options("counter,abc").unwrap_err();
        assert!(err.to_string().contains("counterMax"));
        let err = parse_rate_options("counter,,x").unwrap_err();
        assert!(err.to_string().contains("resetThreshold"));
    }

    #[test]
    fn test_empty_rate_block_is_error() {
        let err = parse_specification("avg:rate{}:m").unwrap_err();
        assert!(matches!(err, SpecError::RateFormat(_)));
    }

    #[test]
    fn test_malformed_rate_term() {
        let err = parse_specification("avg:rated:m").unwrap_err();
        assert!(matches!(err, SpecError::RateFormat(_)));
    }

    #[test]
    fn test_serialization_normalizes_order() {
        let spec = parse_specification("sum:rate{counter,,1000}:10m-avg:sys.cpu{host=a}").unwrap();
        let text = spec.to_string();
        assert_eq!(text, "sum:10m-avg:rate{counter,,1000}:sys.cpu{host=a}");
        assert_eq!(parse_specification(&text).unwrap(), spec);
    }

    #[test]
    fn test_metric_defaults_aggregator_in_output() {
        let spec = parse_specification("sys.cpu{host=a|b}").unwrap();
        assert_eq!(spec.to_string(), "avg:sys.cpu{host=a|b}");
    }

    #[test]
    fn test_bad_tag_pair() {
        assert!(matches!(
            parse_specification("sum:m{host}"),
            Err(SpecError::Parse(_))
        ));
        assert!(matches!(
            parse_specification("sum:m{=a}"),
            Err(SpecError::Parse(_))
        ));
    }

    #[test]
    fn test_metric_with_spaces_kept() {
        let spec = parse_specification("sum:disk used{mount=/}").unwrap();
        assert_eq!(spec.metric.as_deref(), Some("disk used"));
    }
}
