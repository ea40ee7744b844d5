//! SLA verdicts over a probe's measurement

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::config::{SlaConfig, VerdictPolicy};
use crate::probe::MeasurementResult;

/// Why a probe passed or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    /// Latency within the SLA at the evaluated percentile
    WithinSla,
    /// Errors alone push the adjusted percentile past 100, or nothing succeeded
    TooManyErrors,
    /// Latency at the evaluated percentile is above the SLA
    LatencyExceeded,
    /// Success ratio below the configured floor
    SuccessRateBelowFloor,
    /// The generator delivered more than 1 req/sec less than requested
    RateNotAchieved,
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::WithinSla => "within sla",
            Self::TooManyErrors => "too many errors",
            Self::LatencyExceeded => "latency exceeded",
            Self::SuccessRateBelowFloor => "success rate below floor",
            Self::RateNotAchieved => "rate not achieved",
        };
        f.write_str(text)
    }
}

/// Outcome of evaluating one probe
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub pass: bool,

    /// Latency at `percentile`, absent when the histogram was not queried
    pub latency: Option<Duration>,

    /// Percentile the verdict was computed at (error-adjusted when applicable)
    pub percentile: f64,

    pub reason: VerdictReason,
}

impl Verdict {
    fn pass(latency: Duration, percentile: f64) -> Self {
        Self {
            pass: true,
            latency: Some(latency),
            percentile,
            reason: VerdictReason::WithinSla,
        }
    }

    fn fail(reason: VerdictReason, latency: Option<Duration>, percentile: f64) -> Self {
        Self {
            pass: false,
            latency,
            percentile,
            reason,
        }
    }
}

/// Percentile computed over successes and errors together.
///
/// Errors count as SLA misses, so every error pushes the percentile a success
/// has to satisfy further up. Infinite when nothing succeeded but something failed.
pub fn adjusted_percentile(target: f64, successes: u64, errors: u64) -> f64 {
    if errors == 0 {
        return target;
    }
    if successes == 0 {
        return f64::INFINITY;
    }
    target * (successes + errors) as f64 / successes as f64
}

/// Renders pass/fail verdicts under the configured policy
#[derive(Debug, Clone)]
pub struct SlaEvaluator {
    sla: SlaConfig,
}

impl SlaEvaluator {
    pub fn new(sla: SlaConfig) -> Self {
        Self { sla }
    }

    pub fn evaluate(&self, result: &MeasurementResult) -> Verdict {
        match self.sla.policy {
            VerdictPolicy::ErrorAdjusted => self.evaluate_error_adjusted(result),
            VerdictPolicy::SuccessFloor => self.evaluate_success_floor(result),
        }
    }

    fn evaluate_error_adjusted(&self, result: &MeasurementResult) -> Verdict {
        let percentile = adjusted_percentile(
            self.sla.target_percentile,
            result.success_count(),
            result.error_count,
        );
        if percentile > 100.0 {
            return Verdict::fail(VerdictReason::TooManyErrors, None, percentile);
        }
        self.check_latency(result, percentile)
    }

    fn evaluate_success_floor(&self, result: &MeasurementResult) -> Verdict {
        let percentile = self.sla.target_percentile;

        if result.success_percent() < self.sla.success_floor() {
            return Verdict::fail(VerdictReason::SuccessRateBelowFloor, None, percentile);
        }

        let requested = f64::from(result.rate);
        if result.achieved_rate < requested && requested - result.achieved_rate > 1.0 {
            return Verdict::fail(VerdictReason::RateNotAchieved, None, percentile);
        }

        self.check_latency(result, percentile)
    }

    fn check_latency(&self, result: &MeasurementResult, percentile: f64) -> Verdict {
        let Some(latency) = result.histogram.value_at_percentile(percentile) else {
            return Verdict::fail(VerdictReason::TooManyErrors, None, percentile);
        };
        if latency > self.sla.max_latency {
            return Verdict::fail(VerdictReason::LatencyExceeded, Some(latency), percentile);
        }
        Verdict::pass(latency, percentile)
    }
}
