//! TSDB Gateway - metric query aggregation in front of an OpenTSDB-style store
//!
//! This library turns a batch of metric specifications into one
//! time-aligned answer:
//! - A small DSL for specifications (`sum:10m-avg:rate:sys.cpu{host=*}`)
//! - Concurrent fan-out of sub-queries with per-series failure isolation
//! - Bucketing of raw points on a fixed time grid
//! - Gap filling (linear, zero, previous) per specification
//! - An RPN calculator for series derived from other series
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tsdb_gateway::{
//!     output, FanoutExecutor, GatewayConfig, HttpTransport, MetricQuery, MetricSpecification,
//!     ResultProcessor,
//! };
//!
//! let config = GatewayConfig::default();
//! let transport = Arc::new(HttpTransport::new(&config.backend).unwrap());
//! let executor = FanoutExecutor::open(&config, transport).unwrap();
//!
//! let query = MetricQuery::new(
//!     1_700_000_000,
//!     vec![
//!         "sum:sys.mem.used".parse::<MetricSpecification>().unwrap().with_id("used"),
//!         "sum:sys.mem.total".parse::<MetricSpecification>().unwrap().with_id("total"),
//!         MetricSpecification::calculated("mem.pct", "used,total,/,100,*"),
//!     ],
//! );
//!
//! let processor = ResultProcessor::new(&executor, config.query.bucket_size_secs);
//! let outcome = processor.process(&query).unwrap();
//! for series in output::write_series(&outcome) {
//!     println!("{} {}", series.name, series.status);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod bucket;
pub mod error;
pub mod key;
pub mod output;
pub mod tags;
pub mod types;

/// Configuration management with TOML support
pub mod config;

/// Metric specifications and their text DSL
pub mod spec;

/// Bounded-concurrency fan-out to the backend, plus administrative calls
pub mod fanout;

/// Gap filling grouped by interpolator
pub mod interpolation;

/// Stack-machine calculator for derived series
pub mod rpn;

/// Per-request orchestration of fetch, interpolation and evaluation
pub mod processor;

// Re-export main types
pub use backend::{HttpTransport, RawResponse, Transport};
pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use fanout::FanoutExecutor;
pub use processor::{MetricQuery, QueryOutcome, ResultProcessor};
pub use spec::MetricSpecification;
pub use types::{DataPoint, QueryStatus, QueryWindow};
