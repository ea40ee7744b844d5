//! Run configuration types
//!
//! A run is described by a [`RunConfig`], usually loaded from a TOML file and
//! then overridden field by field from the command line. Every section falls
//! back to the defaults of the classic tool when omitted:
//!
//! ```toml
//! [target]
//! url = "http://localhost:8080/health"
//! method = "GET"
//!
//! [sla]
//! max_latency = "500ms"
//! target_percentile = 99.9
//! rate_accuracy = 100.0
//!
//! [search]
//! start_rate = 20
//! climb_multiple = 2.0
//! duration = "1m"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RatescanError, Result};

/// Complete run configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Endpoint under test
    #[serde(default)]
    pub target: TargetConfig,

    /// Load generator tuning
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Service level objective
    #[serde(default)]
    pub sla: SlaConfig,

    /// Rate search strategy
    #[serde(default)]
    pub search: SearchConfig,

    /// Ramp-up before each measurement
    #[serde(default)]
    pub ramp: RampConfig,

    /// Artifacts and reporting
    #[serde(default)]
    pub output: OutputConfig,
}

impl RunConfig {
    /// Load a configuration file; missing sections take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| RatescanError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Parse a configuration from TOML text
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Check every bound before any probe runs
    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        self.generator.validate()?;
        self.sla.validate()?;
        self.search.validate()?;
        Ok(())
    }
}

// ============================================================================
// TARGET
// ============================================================================

/// Endpoint under test
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Absolute URL every request is sent to
    #[serde(default)]
    pub url: String,

    /// HTTP request method
    #[serde(default = "default_method")]
    pub method: String,

    /// File whose content is sent as the body of each request
    #[serde(default)]
    pub body_file: Option<PathBuf>,

    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: default_method(),
            body_file: None,
            headers: BTreeMap::new(),
        }
    }
}

impl TargetConfig {
    fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(RatescanError::config("target url is required"));
        }
        reqwest::Url::parse(&self.url)
            .map_err(|e| RatescanError::config(format!("invalid target url {:?}: {e}", self.url)))?;
        reqwest::Method::from_bytes(self.method.as_bytes())
            .map_err(|_| RatescanError::config(format!("invalid http method {:?}", self.method)))?;
        Ok(())
    }

    /// Read the configured body file, if any
    pub fn load_body(&self) -> Result<Option<Vec<u8>>> {
        let Some(path) = &self.body_file else {
            return Ok(None);
        };
        std::fs::read(path)
            .map(Some)
            .map_err(|source| RatescanError::Read {
                path: path.clone(),
                source,
            })
    }
}

// ============================================================================
// GENERATOR
// ============================================================================

/// Load generator tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Max time to wait for a response
    #[serde(default = "default_max_timeout", with = "duration_str")]
    pub max_timeout: Duration,

    /// Max concurrent (and idle) connections to the target host
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Reuse connections between requests
    #[serde(default = "default_true")]
    pub keep_alive: bool,
}

fn default_max_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_max_connections() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_timeout: default_max_timeout(),
            max_connections: default_max_connections(),
            keep_alive: true,
        }
    }
}

impl GeneratorConfig {
    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(RatescanError::config("max connections must be positive"));
        }
        if self.max_connections > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(RatescanError::config(format!(
                "max connections must be at most {}, got {}",
                tokio::sync::Semaphore::MAX_PERMITS,
                self.max_connections
            )));
        }
        if self.max_timeout.is_zero() {
            return Err(RatescanError::config("max timeout must be positive"));
        }
        Ok(())
    }
}

// ============================================================================
// SLA
// ============================================================================

/// How a measurement is turned into a verdict
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerdictPolicy {
    /// Fold errors into the percentile population
    #[default]
    ErrorAdjusted,
    /// Plain success-rate floor plus an achieved-rate floor
    SuccessFloor,
}

impl std::str::FromStr for VerdictPolicy {
    type Err = RatescanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "error-adjusted" => Ok(Self::ErrorAdjusted),
            "success-floor" => Ok(Self::SuccessFloor),
            other => Err(RatescanError::config(format!(
                "unknown verdict policy {other:?} (expected error-adjusted or success-floor)"
            ))),
        }
    }
}

/// Service level objective
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlaConfig {
    /// Max acceptable latency at the target percentile
    #[serde(default = "default_max_latency", with = "duration_str")]
    pub max_latency: Duration,

    /// Percentile the latency is measured at, in [0, 100]
    #[serde(default = "default_percentile")]
    pub target_percentile: f64,

    /// Success ratio floor in percent, used by [`VerdictPolicy::SuccessFloor`].
    /// Defaults to the target percentile.
    #[serde(default)]
    pub min_success_percent: Option<f64>,

    /// How close the reported rate must be to the true maximum, in (0, 100].
    /// 100 means exact.
    #[serde(default = "default_rate_accuracy")]
    pub rate_accuracy: f64,

    /// Verdict policy
    #[serde(default)]
    pub policy: VerdictPolicy,
}

fn default_max_latency() -> Duration {
    Duration::from_millis(500)
}

fn default_percentile() -> f64 {
    99.9
}

fn default_rate_accuracy() -> f64 {
    100.0
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            max_latency: default_max_latency(),
            target_percentile: default_percentile(),
            min_success_percent: None,
            rate_accuracy: default_rate_accuracy(),
            policy: VerdictPolicy::default(),
        }
    }
}

impl SlaConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.target_percentile) {
            return Err(RatescanError::config(format!(
                "percentile must be within [0, 100], got {}",
                self.target_percentile
            )));
        }
        if !(self.rate_accuracy > 0.0 && self.rate_accuracy <= 100.0) {
            return Err(RatescanError::config(format!(
                "rps accuracy must be within (0, 100], got {}",
                self.rate_accuracy
            )));
        }
        if let Some(floor) = self.min_success_percent {
            if !(0.0..=100.0).contains(&floor) {
                return Err(RatescanError::config(format!(
                    "min success percent must be within [0, 100], got {floor}"
                )));
            }
        }
        Ok(())
    }

    /// Effective success floor in percent
    pub fn success_floor(&self) -> f64 {
        self.min_success_percent.unwrap_or(self.target_percentile)
    }

    /// Accuracy band as a fraction in (0, 1]
    pub fn accuracy_ratio(&self) -> f64 {
        self.rate_accuracy / 100.0
    }
}

// ============================================================================
// SEARCH
// ============================================================================

/// Rate search strategy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// First candidate rate in requests per second
    #[serde(default = "default_start_rate")]
    pub start_rate: u32,

    /// Growth factor applied after each passing probe, must exceed 1.0
    #[serde(default = "default_climb_multiple")]
    pub climb_multiple: f64,

    /// Optional ceiling for candidate rates
    #[serde(default)]
    pub max_rate: Option<u32>,

    /// Measurement duration of each probe
    #[serde(default = "default_duration", with = "duration_str")]
    pub duration: Duration,
}

fn default_start_rate() -> u32 {
    20
}

fn default_climb_multiple() -> f64 {
    2.0
}

fn default_duration() -> Duration {
    Duration::from_secs(60)
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            start_rate: default_start_rate(),
            climb_multiple: default_climb_multiple(),
            max_rate: None,
            duration: default_duration(),
        }
    }
}

/// Shortest probe that still issues a request at 1 req/sec
pub const MIN_PROBE_DURATION: Duration = Duration::from_secs(1);

impl SearchConfig {
    fn validate(&self) -> Result<()> {
        if self.start_rate == 0 {
            return Err(RatescanError::config("starting rps must be positive"));
        }
        if !(self.climb_multiple > 1.0) || !self.climb_multiple.is_finite() {
            return Err(RatescanError::config(format!(
                "climb multiple must be greater than 1.0, got {}",
                self.climb_multiple
            )));
        }
        if let Some(max) = self.max_rate {
            if max < self.start_rate {
                return Err(RatescanError::config(format!(
                    "max rps {max} is below the starting rps {}",
                    self.start_rate
                )));
            }
        }
        // Refinement can probe down to 1 req/sec, which needs a whole second to issue a request.
        if self.duration < MIN_PROBE_DURATION {
            return Err(RatescanError::config(format!(
                "probe duration must be at least {:?}, got {:?}",
                MIN_PROBE_DURATION, self.duration
            )));
        }
        Ok(())
    }
}

// ============================================================================
// RAMP / OUTPUT
// ============================================================================

/// Ramp-up before each measurement
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RampConfig {
    /// Total ramp time; zero disables the ramp
    #[serde(default, with = "duration_str")]
    pub duration: Duration,

    /// Number of intermediate rates
    #[serde(default = "default_ramp_steps")]
    pub steps: u32,
}

fn default_ramp_steps() -> u32 {
    5
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            duration: Duration::ZERO,
            steps: default_ramp_steps(),
        }
    }
}

/// Artifacts and reporting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving the `lat_<rate>.txt` files
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Emit JSON lines instead of human-readable lines
    #[serde(default)]
    pub json: bool,

    /// Write Prometheus text metrics here at the end of the run
    #[serde(default)]
    pub metrics_file: Option<PathBuf>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            json: false,
            metrics_file: None,
        }
    }
}

/// Human readable durations (`"500ms"`, `"1m 30s"`) in configuration files
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
