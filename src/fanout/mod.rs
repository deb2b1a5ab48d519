//! Concurrent fan-out of sub-queries to the backend
//!
//! The [`FanoutExecutor`] owns a dedicated multi-thread runtime and a
//! semaphore bounding in-flight sub-queries. Callers stay synchronous:
//! [`FanoutExecutor::fetch`] scatters one task per specification, waits for
//! all of them and gathers exactly one [`SeriesResult`] per specification,
//! in submission order. A failing sub-query never fails the batch; it shows
//! up as an ERROR or WARNING status on its own result.
//!
//! # Architecture
//!
//! ```text
//! specs ──► SubQuery ──► JoinSet task ──► Transport::post_json ──► classify
//!  [0..N]                (permit from                              │
//!                         Semaphore(max))                          ▼
//!                                             results[index] = SeriesResult
//! ```
//!
//! Administrative calls (suggest, rename, drop caches) run on the same
//! runtime with bounded retries, see [`admin`] and [`retry`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tsdb_gateway::backend::HttpTransport;
//! use tsdb_gateway::config::GatewayConfig;
//! use tsdb_gateway::fanout::FanoutExecutor;
//! use tsdb_gateway::spec::MetricSpecification;
//! use tsdb_gateway::types::QueryWindow;
//!
//! let config = GatewayConfig::default();
//! let transport = Arc::new(HttpTransport::new(&config.backend).unwrap());
//! let mut executor = FanoutExecutor::open(&config, transport).unwrap();
//!
//! let specs = vec![MetricSpecification::for_metric("sys.cpu.user")];
//! let results = executor.fetch(QueryWindow::since(1_700_000_000), None, &specs);
//! assert_eq!(results.len(), 1);
//!
//! executor.close();
//! ```

pub mod admin;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backend::wire::{ErrorEnvelope, SubQuery, TsdbQuery, WireSeries};
use crate::backend::{RawResponse, Transport, QUERY_PATH};
use crate::config::{AdminConfig, GatewayConfig};
use crate::error::{Error, Result, TransportError};
use crate::spec::MetricSpecification;
use crate::tags::TagSet;
use crate::types::{DataPoint, QueryStatus, QueryWindow};

pub use admin::{RenameProgress, RenameRequest, RenameSummary};
pub use retry::RetryPolicy;

/// Message of a successful sub-query
pub const STATUS_OK: &str = "ok";

/// Message of a successful sub-query that returned no series
pub const STATUS_NO_DATA: &str = "query successful, no data";

/// Message of results produced after the executor was closed
pub const STATUS_CLOSED: &str = "executor closed";

/// One concrete series returned by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSeries {
    /// Metric name, spaces restored
    pub metric: String,

    /// Concrete tags, spaces restored
    pub tags: TagSet,

    /// Tag keys the backend aggregated away
    pub aggregate_tags: Vec<String>,

    /// Points in timestamp order
    pub points: Vec<DataPoint>,
}

impl From<WireSeries> for FetchedSeries {
    fn from(series: WireSeries) -> Self {
        Self {
            metric: series.metric_name(),
            tags: series.tag_set(),
            points: series.points(),
            aggregate_tags: series.aggregate_tags,
        }
    }
}

/// Outcome of one specification's sub-query
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesResult {
    /// Position of the specification in the submitted batch
    pub spec_index: usize,

    /// Identifier of the originating specification
    pub spec_id: Option<String>,

    /// Name of the originating specification (name, else metric)
    pub spec_name: Option<String>,

    /// Outcome of the sub-query
    pub status: QueryStatus,

    /// Returned series; empty unless the query succeeded
    pub series: Vec<FetchedSeries>,
}

impl SeriesResult {
    fn new(index: usize, spec: &MetricSpecification, status: QueryStatus) -> Self {
        Self {
            spec_index: index,
            spec_id: spec.id.clone(),
            spec_name: spec.name_or_metric().map(str::to_string),
            status,
            series: Vec::new(),
        }
    }
}

/// Map a backend answer (or transport failure) to a status and series list
pub fn classify_response(
    response: std::result::Result<RawResponse, TransportError>,
) -> (QueryStatus, Vec<FetchedSeries>) {
    let response = match response {
        Ok(response) => response,
        Err(e) => return (QueryStatus::error(format!("{}: {}", e.kind(), e)), Vec::new()),
    };

    if !response.is_success() {
        let message = ErrorEnvelope::message_of(&response.body)
            .unwrap_or_else(|| response.body.trim().to_string());
        return (
            QueryStatus::error(format!("HTTP {}: {}", response.status, message)),
            Vec::new(),
        );
    }

    match serde_json::from_str::<Vec<WireSeries>>(&response.body) {
        Err(e) => (
            QueryStatus::warning(format!("unparseable backend response: {}", e)),
            Vec::new(),
        ),
        Ok(series) if series.is_empty() => (QueryStatus::warning(STATUS_NO_DATA), Vec::new()),
        Ok(series) => (
            QueryStatus::success(STATUS_OK),
            series.into_iter().map(FetchedSeries::from).collect(),
        ),
    }
}

/// Bounded-concurrency executor for backend sub-queries
///
/// Constructed explicitly with [`FanoutExecutor::open`] and shut down with
/// [`FanoutExecutor::close`] (or on drop). Its blocking methods must not be
/// called from inside another async runtime.
pub struct FanoutExecutor {
    runtime: Option<Runtime>,
    transport: Arc<dyn Transport>,
    permits: Arc<Semaphore>,
    use_filters: bool,
    ms_resolution: bool,
    admin: AdminConfig,
}

impl std::fmt::Debug for FanoutExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutExecutor")
            .field("open", &self.is_open())
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl FanoutExecutor {
    /// Start the worker runtime
    pub fn open(config: &GatewayConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let (core, max) = config.executor.effective_sizes();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(core)
            .max_blocking_threads(max)
            .thread_name("fanout-worker")
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("Failed to start fan-out runtime: {}", e)))?;

        info!(
            core_pool_size = core,
            max_pool_size = max,
            "Fan-out executor opened"
        );

        Ok(Self {
            runtime: Some(runtime),
            transport,
            permits: Arc::new(Semaphore::new(max)),
            use_filters: config.backend.use_filters,
            ms_resolution: config.backend.ms_resolution,
            admin: config.admin.clone(),
        })
    }

    /// Shut the runtime down; in-flight calls are abandoned
    pub fn close(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            info!("Fan-out executor closed");
        }
    }

    /// Whether the executor accepts work
    pub fn is_open(&self) -> bool {
        self.runtime.is_some()
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime.as_ref().ok_or(Error::ExecutorClosed)
    }

    fn retry_policy(&self, attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(self.admin.retry_backoff_ms))
    }

    /// Run one sub-query per specification and gather the results
    ///
    /// Always returns `specs.len()` results in submission order.
    /// `downsample` overrides every specification's own downsample.
    pub fn fetch(
        &self,
        window: QueryWindow,
        downsample: Option<&str>,
        specs: &[MetricSpecification],
    ) -> Vec<SeriesResult> {
        let runtime = match self.runtime() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(spec_count = specs.len(), "Fetch on closed executor");
                return specs
                    .iter()
                    .enumerate()
                    .map(|(i, spec)| SeriesResult::new(i, spec, QueryStatus::error(STATUS_CLOSED)))
                    .collect();
            }
        };

        debug!(spec_count = specs.len(), "Starting fan-out");

        let mut slots: Vec<Option<(QueryStatus, Vec<FetchedSeries>)>> = vec![None; specs.len()];
        let mut join_set = JoinSet::new();

        for (index, spec) in specs.iter().enumerate() {
            let body = match self.request_body(window, downsample, spec) {
                Ok(body) => body,
                Err(e) => {
                    warn!(spec_index = index, error = %e, "Could not build sub-query");
                    slots[index] = Some((QueryStatus::error(e.to_string()), Vec::new()));
                    continue;
                }
            };

            let transport = Arc::clone(&self.transport);
            let permits = Arc::clone(&self.permits);

            join_set.spawn_on(
                async move {
                    // bound in-flight sub-queries
                    let _permit = permits.acquire_owned().await;
                    let response = transport.post_json(QUERY_PATH, body).await;
                    (index, classify_response(response))
                },
                runtime.handle(),
            );
        }

        runtime.block_on(async {
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((index, outcome)) => slots[index] = Some(outcome),
                    Err(e) => warn!(error = %e, "Sub-query task failed"),
                }
            }
        });

        let results: Vec<SeriesResult> = specs
            .iter()
            .zip(slots)
            .enumerate()
            .map(|(index, (spec, slot))| {
                let (status, series) = slot.unwrap_or_else(|| {
                    (QueryStatus::error("sub-query task aborted"), Vec::new())
                });
                if status.is_error() {
                    warn!(
                        spec_index = index,
                        metric = spec.metric_or_name().unwrap_or_default(),
                        status = %status,
                        "Sub-query failed"
                    );
                }
                SeriesResult {
                    series,
                    ..SeriesResult::new(index, spec, status)
                }
            })
            .collect();

        debug!(
            spec_count = specs.len(),
            failed = results.iter().filter(|r| r.status.is_error()).count(),
            "Fan-out complete"
        );
        results
    }

    fn request_body(
        &self,
        window: QueryWindow,
        downsample: Option<&str>,
        spec: &MetricSpecification,
    ) -> Result<serde_json::Value> {
        let sub_query = SubQuery::from_spec(spec, downsample, self.use_filters)?;
        let query = TsdbQuery::single(window, sub_query, self.ms_resolution);
        Ok(serde_json::to_value(query)?)
    }
}

impl Drop for FanoutExecutor {
    fn drop(&mut self) {
        self.close();
    }
}
