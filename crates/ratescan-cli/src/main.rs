//! # ratescan CLI
//!
//! Finds the maximum request rate an HTTP endpoint sustains within a latency SLA.
//!
//! ## Usage
//!
//! ```bash
//! # Keep p99.9 under 500ms, starting at 20 req/sec
//! ratescan http://localhost:8080/health
//!
//! # POST a body, tighter SLA, 30s probes, answer within 5%
//! ratescan --method POST --body-file req.json --sla 200ms --duration 30s \
//!     --rps-accuracy 95 http://localhost:8080/api
//!
//! # Everything from a file, overriding the start rate
//! ratescan --config search.toml --rps 500
//! ```
//!
//! Exit codes: `0` once a working rate is found, `1` on configuration or
//! runtime errors, `2` when not even 1 req/sec meets the SLA.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use ratescan_core::report::summary_line;
use ratescan_core::{
    ArtifactStore, HttpGenerator, HumanReporter, JsonlReporter, LoadProbeExecutor, RateSearch,
    Reporter, RunConfig, SearchMetrics, SearchOutcome, SlaEvaluator, TargetSpec, VerdictPolicy,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ratescan")]
#[command(version)]
#[command(about = "Find the maximum request rate an endpoint sustains within a latency SLA", long_about = None)]
struct Cli {
    /// Target URL
    url: Option<String>,

    /// TOML configuration file; command-line flags take precedence
    #[arg(short, long, env = "RATESCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Starting rate in req/sec [default: 20]
    #[arg(long)]
    rps: Option<u32>,

    /// Maximum latency allowed at the target percentile [default: 500ms]
    #[arg(long, value_parser = humantime::parse_duration)]
    sla: Option<Duration>,

    /// Measurement duration of every probe [default: 1m]
    #[arg(short, long, value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Per-request timeout [default: 3s]
    #[arg(long, value_parser = humantime::parse_duration)]
    max_timeout: Option<Duration>,

    /// Maximum concurrent connections [default: 10000]
    #[arg(long)]
    max_connections: Option<usize>,

    /// Reuse connections between requests [default: true]
    #[arg(long)]
    keep_alive: Option<bool>,

    /// Latency percentile the SLA applies to [default: 99.9]
    #[arg(long)]
    percentile: Option<f64>,

    /// Accuracy band in percent; 100 searches for the exact rate [default: 100]
    #[arg(long)]
    rps_accuracy: Option<f64>,

    /// Growth factor applied to the rate after every passing probe [default: 2.0]
    #[arg(long)]
    climb_multiple: Option<f64>,

    /// Stop growing at this rate and report it when it passes
    #[arg(long)]
    max_rps: Option<u32>,

    /// HTTP method [default: GET]
    #[arg(short, long)]
    method: Option<String>,

    /// File sent as the request body
    #[arg(long)]
    body_file: Option<PathBuf>,

    /// Extra request header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Ramp-up duration before every probe; 0 disables it [default: 0s]
    #[arg(long, value_parser = humantime::parse_duration)]
    ramp_up: Option<Duration>,

    /// Number of ramp-up steps [default: 5]
    #[arg(long)]
    ramp_steps: Option<u32>,

    /// Verdict policy: error-adjusted or success-floor [default: error-adjusted]
    #[arg(long, value_parser = parse_policy)]
    policy: Option<VerdictPolicy>,

    /// Minimum success percentage under the success-floor policy [default: the percentile]
    #[arg(long)]
    min_success: Option<f64>,

    /// Directory receiving the latency distribution files [default: .]
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Report probes as JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Write Prometheus metrics to this file once the search ends
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_policy(raw: &str) -> Result<VerdictPolicy, String> {
    raw.parse().map_err(|e: ratescan_core::RatescanError| e.to_string())
}

/// Apply every flag that was given on top of `config`
macro_rules! override_config {
    ($cli:ident, $config:ident, {$($flag:ident => $($field:ident).+),+ $(,)?}) => {
        $(
            if let Some(value) = $cli.$flag.take() {
                debug!("option '{}': use command line", stringify!($flag));
                $config.$($field).+ = value;
            }
        )+
    };
}

/// File configuration (or defaults) with the command line layered on top
fn resolve_config(mut cli: Cli) -> anyhow::Result<RunConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            RunConfig::load(path)?
        }
        None => RunConfig::default(),
    };

    override_config!(cli, config, {
        url => target.url,
        method => target.method,
        rps => search.start_rate,
        climb_multiple => search.climb_multiple,
        duration => search.duration,
        sla => sla.max_latency,
        percentile => sla.target_percentile,
        rps_accuracy => sla.rate_accuracy,
        policy => sla.policy,
        max_timeout => generator.max_timeout,
        max_connections => generator.max_connections,
        keep_alive => generator.keep_alive,
        ramp_up => ramp.duration,
        ramp_steps => ramp.steps,
        output_dir => output.dir,
    });

    if let Some(path) = cli.body_file.take() {
        config.target.body_file = Some(path);
    }
    if let Some(floor) = cli.min_success.take() {
        config.sla.min_success_percent = Some(floor);
    }
    if let Some(ceiling) = cli.max_rps.take() {
        config.search.max_rate = Some(ceiling);
    }
    if let Some(path) = cli.metrics_file.take() {
        config.output.metrics_file = Some(path);
    }
    config.output.json |= cli.json;
    config.target.headers.extend(cli.headers);

    Ok(config)
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr; stdout carries the probe report.
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(config: RunConfig) -> anyhow::Result<SearchOutcome> {
    let body = config.target.load_body()?;
    let target = TargetSpec::from_config(&config.target, body)?;
    let generator = HttpGenerator::new(&config.generator, target)?;
    let artifacts = ArtifactStore::new(&config.output.dir)?;
    let metrics = Arc::new(SearchMetrics::new()?);
    let reporter: Box<dyn Reporter> = if config.output.json {
        Box::new(JsonlReporter::new())
    } else {
        Box::new(HumanReporter::new())
    };

    info!(
        url = %config.target.url,
        start_rate = config.search.start_rate,
        sla = ?config.sla.max_latency,
        percentile = config.sla.target_percentile,
        policy = ?config.sla.policy,
        "Starting capacity search"
    );

    let executor = LoadProbeExecutor::new(
        generator,
        config.search.duration,
        config.ramp.clone(),
        SlaEvaluator::new(config.sla.clone()),
        artifacts,
        reporter,
        metrics.clone(),
    );
    let report = RateSearch::new(executor, config.search.clone(), config.sla.accuracy_ratio())
        .run()
        .await?;

    if let Some(path) = &config.output.metrics_file {
        metrics
            .write_to(path)
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
        info!("Metrics written to {}", path.display());
    }

    info!("{}", summary_line(&report.outcome));
    Ok(report.outcome)
}

const EXIT_ERROR: u8 = 1;
const EXIT_NO_WORKING_RATE: u8 = 2;

/// Exit code for a command line clap rejected; help and version are not failures
fn usage_exit_code(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => EXIT_ERROR,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(usage_exit_code(&err));
        }
    };
    init_tracing(cli.verbose, cli.log_json);

    let config = match resolve_config(cli).and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(err) => {
            let _ = Cli::command()
                .error(ErrorKind::ValueValidation, format!("{err:#}"))
                .print();
            return ExitCode::from(EXIT_ERROR);
        }
    };

    match run(config).await {
        Ok(SearchOutcome::NoWorkingRate) => {
            warn!("No rate satisfied the SLA");
            ExitCode::from(EXIT_NO_WORKING_RATE)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}
