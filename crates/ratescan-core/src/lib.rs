//! # ratescan
//!
//! Finds the highest request rate an HTTP endpoint sustains while meeting a
//! latency SLA at a given percentile.
//!
//! ## How a search runs
//!
//! - **Ramp-up**: each probe optionally steps up to its rate first; those
//!   requests are discarded.
//! - **Probe**: the generator runs at a fixed rate for a fixed duration, the
//!   latencies of successful requests land in an HDR histogram and errors
//!   are counted.
//! - **Verdict**: the percentile is error-adjusted (or a plain success floor
//!   is applied) and compared against the SLA.
//! - **Search**: exponential growth while probes pass, then binary search
//!   between the last passing and first failing rate.
//!
//! ## Usage
//!
//! ```bash
//! # Find the max rate keeping p99.9 under 500ms
//! ratescan http://localhost:8080/health
//!
//! # Accept an answer within 5%, with a 10s ramp before each probe
//! ratescan --rps-accuracy 95 --ramp-up 10s --sla 250ms http://localhost:8080/api
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod generator;
pub mod histogram;
pub mod metrics;
pub mod probe;
pub mod ramp;
pub mod report;
pub mod search;
pub mod sla;

pub use artifact::ArtifactStore;
pub use config::{RunConfig, SlaConfig, VerdictPolicy};
pub use error::{RatescanError, Result};
pub use generator::{HttpGenerator, LoadGenerator, Outcome, TargetSpec};
pub use histogram::LatencyHistogram;
pub use metrics::SearchMetrics;
pub use probe::{LoadProbeExecutor, MeasurementResult, Prober};
pub use report::{HumanReporter, JsonlReporter, Reporter};
pub use search::{RateSearch, SearchOutcome, SearchReport, SearchState};
pub use sla::{SlaEvaluator, Verdict, VerdictReason};
