//! Console reporting of probes and the final answer

use std::time::Duration;

use crate::probe::MeasurementResult;
use crate::search::{SearchOutcome, SearchReport};
use crate::sla::{Verdict, VerdictReason};

/// Receives probe lifecycle events
pub trait Reporter: Send + Sync + 'static {
    fn probe_started(&mut self, rate: u32, duration: Duration);
    fn probe_finished(&mut self, result: &MeasurementResult, verdict: &Verdict);
    fn search_finished(&mut self, report: &SearchReport);
}

fn timestamp() -> String {
    chrono::Local::now().format("[%Y-%m-%dT%H:%M:%S]").to_string()
}

fn format_latency(latency: Option<Duration>) -> String {
    latency.map_or_else(|| "n/a".to_string(), |l| format!("{l:?}"))
}

/// Final answer as a single human-readable line
pub fn summary_line(outcome: &SearchOutcome) -> String {
    match outcome {
        SearchOutcome::Exact(rate) => format!("Maximum Working Rate: {rate} req/sec"),
        SearchOutcome::Range { low, high } => {
            format!("Maximum Working Rate Within: {low}-{high} req/sec")
        }
        SearchOutcome::CeilingReached(rate) => {
            format!("Configured ceiling of {rate} req/sec sustained; the true maximum is higher")
        }
        SearchOutcome::NoWorkingRate => "No working rate found: even 1 req/sec fails the SLA".to_string(),
    }
}

// ============================================================================
// HUMAN
// ============================================================================

/// Timestamped lines on stdout
#[derive(Debug, Default)]
pub struct HumanReporter;

impl HumanReporter {
    pub fn new() -> Self {
        Self
    }

    fn failure_detail(result: &MeasurementResult, verdict: &Verdict) -> String {
        match verdict.reason {
            VerdictReason::TooManyErrors | VerdictReason::SuccessRateBelowFloor => {
                format!("errors: {:.3}%", result.error_percent())
            }
            VerdictReason::RateNotAchieved => {
                format!("only managed to get to {:.2} req/sec", result.achieved_rate)
            }
            VerdictReason::LatencyExceeded | VerdictReason::WithinSla => format!(
                "latency {} at p{:.3}",
                format_latency(verdict.latency),
                verdict.percentile
            ),
        }
    }
}

impl Reporter for HumanReporter {
    fn probe_started(&mut self, rate: u32, duration: Duration) {
        println!(
            "{} Starting {} req/sec Load Test for {}...",
            timestamp(),
            rate,
            humantime::format_duration(duration)
        );
    }

    fn probe_finished(&mut self, result: &MeasurementResult, verdict: &Verdict) {
        if verdict.pass {
            println!(
                "{} ✅ Success at {} req/sec (latency {})",
                timestamp(),
                result.rate,
                format_latency(verdict.latency)
            );
        } else {
            println!(
                "{} ❌ Failed at {} req/sec ({})",
                timestamp(),
                result.rate,
                Self::failure_detail(result, verdict)
            );
        }
    }

    fn search_finished(&mut self, report: &SearchReport) {
        println!("{}", summary_line(&report.outcome));
    }
}

// ============================================================================
// JSON LINES
// ============================================================================

/// One JSON object per line on stdout
#[derive(Debug, Default)]
pub struct JsonlReporter;

impl JsonlReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for JsonlReporter {
    fn probe_started(&mut self, rate: u32, duration: Duration) {
        let line = serde_json::json!({
            "type": "probe_started",
            "ts": chrono::Utc::now().to_rfc3339(),
            "rate": rate,
            "duration_ms": duration.as_millis() as u64,
        });
        println!("{}", line);
    }

    fn probe_finished(&mut self, result: &MeasurementResult, verdict: &Verdict) {
        let line = serde_json::json!({
            "type": "probe_finished",
            "ts": chrono::Utc::now().to_rfc3339(),
            "rate": result.rate,
            "pass": verdict.pass,
            "reason": verdict.reason,
            "percentile": verdict.percentile,
            "latency_us": verdict.latency.map(|l| l.as_micros() as u64),
            "total": result.total_count,
            "errors": result.error_count,
            "achieved_rate": result.achieved_rate,
        });
        println!("{}", line);
    }

    fn search_finished(&mut self, report: &SearchReport) {
        let line = serde_json::json!({
            "type": "search_finished",
            "ts": chrono::Utc::now().to_rfc3339(),
            "outcome": report.outcome,
            "probes": report.probes.len(),
            "summary": summary_line(&report.outcome),
        });
        println!("{}", line);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Keeps every event for assertions
    #[derive(Debug, Default)]
    pub struct RecordingReporter {
        pub started: Vec<u32>,
        pub finished: Vec<(u32, bool)>,
        pub outcome: Option<SearchOutcome>,
    }

    impl Reporter for RecordingReporter {
        fn probe_started(&mut self, rate: u32, _duration: Duration) {
            self.started.push(rate);
        }

        fn probe_finished(&mut self, result: &MeasurementResult, verdict: &Verdict) {
            self.finished.push((result.rate, verdict.pass));
        }

        fn search_finished(&mut self, report: &SearchReport) {
            self.outcome = Some(report.outcome);
        }
    }
}
