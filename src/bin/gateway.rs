//! TSDB Gateway command-line client
//!
//! Runs metric queries and administrative calls against the backend store
//! and prints the answers as JSON on stdout. Logs go to stderr.
//!
//! # Configuration
//!
//! The gateway reads configuration from:
//! 1. `--config` / `GATEWAY_CONFIG` (path to TOML file)
//! 2. Default configuration
//!
//! Environment overrides (`GATEWAY_BACKEND_URL`, `GATEWAY_CORE_POOL_SIZE`,
//! ...) apply on top of either.
//!
//! # Example Usage
//!
//! ```bash
//! # Two fetched series and a derived one
//! tsdb-gateway query --start 1700000000 --bucket-size 60 \
//!   'sum:sys.mem.used{host=web01}' 'sum:sys.mem.total{host=web01}' \
//!   --calc 'pct=sys.mem.used,sys.mem.total,/,100,*'
//!
//! # Suggest metric names
//! tsdb-gateway suggest metric sys.
//!
//! # Rename tag values
//! tsdb-gateway rename tagv 'web-01=web01' 'web-02=web02'
//!
//! # Flush backend caches
//! tsdb-gateway drop-caches
//! ```

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tsdb_gateway::backend::wire::UidKind;
use tsdb_gateway::fanout::RenameRequest;
use tsdb_gateway::{
    output, Error, FanoutExecutor, GatewayConfig, HttpTransport, MetricQuery,
    MetricSpecification, ResultProcessor,
};

#[derive(Parser)]
#[command(name = "tsdb-gateway")]
#[command(about = "Metric query aggregation in front of an OpenTSDB-style store", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "GATEWAY_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query series given in the specification DSL
    Query {
        /// Specifications, e.g. `sum:1m-avg:rate:sys.cpu{host=*}`
        specs: Vec<String>,

        /// Calculated series as `name=expression`
        #[arg(long = "calc")]
        calculated: Vec<String>,

        /// Start timestamp (seconds)
        #[arg(long)]
        start: i64,

        /// End timestamp (seconds), defaults to now
        #[arg(long)]
        end: Option<i64>,

        /// Bucket width in seconds
        #[arg(long)]
        bucket_size: Option<i64>,

        /// Downsample applied to every fetched series
        #[arg(long)]
        downsample: Option<String>,
    },

    /// Suggest names starting with a prefix
    Suggest {
        /// metric, tagk or tagv
        kind: UidKind,

        /// Name prefix
        #[arg(default_value = "")]
        prefix: String,

        /// Maximum number of names
        #[arg(long, default_value = "25")]
        max: usize,
    },

    /// Rename UIDs
    Rename {
        /// metric, tagk or tagv
        kind: UidKind,

        /// Renames as `old=new`
        #[arg(required = true)]
        renames: Vec<String>,
    },

    /// Flush the backend's caches
    DropCaches,

    /// Validate and print the effective configuration
    CheckConfig,
}

/// Load configuration from file or environment
fn load_config(path: Option<&str>) -> Result<GatewayConfig, Error> {
    let config = match path {
        Some(path) => GatewayConfig::from_file_with_env(path)?,
        None => GatewayConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}

fn split_pair<'a>(value: &'a str, what: &str) -> Result<(&'a str, &'a str), Error> {
    value
        .split_once('=')
        .filter(|(left, right)| !left.is_empty() && !right.is_empty())
        .ok_or_else(|| {
            Error::Configuration(format!("expected {} as 'a=b', got '{}'", what, value))
        })
}

fn build_query(
    specs: &[String],
    calculated: &[String],
    start: i64,
    end: Option<i64>,
    bucket_size: Option<i64>,
    downsample: Option<String>,
) -> Result<MetricQuery, Error> {
    let mut all = specs
        .iter()
        .map(|s| s.parse::<MetricSpecification>())
        .collect::<Result<Vec<_>, _>>()?;

    for calc in calculated {
        let (name, expression) = split_pair(calc, "--calc")?;
        all.push(MetricSpecification::calculated(name, expression));
    }

    Ok(MetricQuery {
        start,
        end,
        downsample,
        bucket_size,
        specs: all,
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Configuration first so its log level can seed the filter
    let config = load_config(cli.config.as_deref());

    let level = config
        .as_ref()
        .map(|c| c.logging.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = config?;
    info!(
        path = cli.config.as_deref().unwrap_or("<defaults>"),
        backend = %config.backend.base_url,
        "Configuration loaded"
    );

    if let Commands::CheckConfig = cli.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let transport = Arc::new(HttpTransport::new(&config.backend)?);
    let mut executor = FanoutExecutor::open(&config, transport)?;

    let result = match cli.command {
        Commands::Query {
            specs,
            calculated,
            start,
            end,
            bucket_size,
            downsample,
        } => build_query(&specs, &calculated, start, end, bucket_size, downsample)
            .and_then(|query| {
                ResultProcessor::new(&executor, config.query.bucket_size_secs).process(&query)
            })
            .and_then(|outcome| print_json(&output::write_series(&outcome))),

        Commands::Suggest { kind, prefix, max } => executor
            .suggest(kind, &prefix, max)
            .and_then(|names| print_json(&names)),

        Commands::Rename { kind, renames } => renames
            .iter()
            .map(|pair| {
                split_pair(pair, "rename").map(|(from, to)| RenameRequest::new(kind, from, to))
            })
            .collect::<Result<Vec<_>, _>>()
            .and_then(|requests| {
                executor.rename(requests, |progress| {
                    if progress.is_success() {
                        info!("{}", progress.message());
                    } else {
                        warn!("{}", progress.message());
                    }
                })
            })
            .and_then(|summary| print_json(&summary)),

        Commands::DropCaches => executor.drop_caches(),

        Commands::CheckConfig => Ok(()),
    };

    executor.close();
    Ok(result?)
}
