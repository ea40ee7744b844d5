//! Prometheus metrics for a capacity search

use std::path::Path;

use prometheus::{Encoder, Gauge, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{RatescanError, Result};
use crate::probe::MeasurementResult;
use crate::sla::Verdict;

/// Probe-level counters and gauges, exportable in the text exposition format
pub struct SearchMetrics {
    registry: Registry,
    probes: IntCounterVec,
    requests: IntCounterVec,
    last_rate: IntGauge,
    last_latency: Gauge,
    last_achieved_rate: Gauge,
    best_rate: IntGauge,
}

impl SearchMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let probes = IntCounterVec::new(
            Opts::new("ratescan_probes_total", "Probes run, by verdict"),
            &["verdict"],
        )?;
        let requests = IntCounterVec::new(
            Opts::new("ratescan_requests_total", "Measured requests, by outcome"),
            &["outcome"],
        )?;
        let last_rate = IntGauge::new("ratescan_probe_rate", "Requested rate of the last probe")?;
        let last_latency = Gauge::new(
            "ratescan_probe_latency_seconds",
            "Latency at the evaluated percentile of the last probe",
        )?;
        let last_achieved_rate = Gauge::new(
            "ratescan_probe_achieved_rate",
            "Requests per second delivered by the last probe",
        )?;
        let best_rate = IntGauge::new(
            "ratescan_best_rate",
            "Highest rate that satisfied the SLA (0 when none)",
        )?;

        registry.register(Box::new(probes.clone()))?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(last_rate.clone()))?;
        registry.register(Box::new(last_latency.clone()))?;
        registry.register(Box::new(last_achieved_rate.clone()))?;
        registry.register(Box::new(best_rate.clone()))?;

        Ok(Self {
            registry,
            probes,
            requests,
            last_rate,
            last_latency,
            last_achieved_rate,
            best_rate,
        })
    }

    pub fn observe_probe(&self, result: &MeasurementResult, verdict: &Verdict) {
        let label = if verdict.pass { "pass" } else { "fail" };
        self.probes.with_label_values(&[label]).inc();
        self.requests
            .with_label_values(&["success"])
            .inc_by(result.success_count());
        self.requests
            .with_label_values(&["error"])
            .inc_by(result.error_count);
        self.last_rate.set(i64::from(result.rate));
        self.last_latency
            .set(verdict.latency.map_or(0.0, |l| l.as_secs_f64()));
        self.last_achieved_rate.set(result.achieved_rate);
    }

    pub fn set_best_rate(&self, rate: Option<u32>) {
        self.best_rate.set(rate.map_or(0, i64::from));
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Write the rendered metrics to `path` (textfile collector layout)
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let rendered = self.render()?;
        std::fs::write(path, rendered).map_err(|source| RatescanError::Artifact {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::LatencyHistogram;
    use crate::sla::VerdictReason;
    use std::time::Duration;

    #[test]
    fn test_probe_observation_is_rendered() {
        let metrics = SearchMetrics::new().unwrap();
        let result = MeasurementResult {
            rate: 80,
            histogram: LatencyHistogram::new().unwrap(),
            error_count: 3,
            total_count: 80,
            achieved_rate: 79.5,
        };
        let verdict = Verdict {
            pass: true,
            latency: Some(Duration::from_millis(250)),
            percentile: 99.9,
            reason: VerdictReason::WithinSla,
        };

        metrics.observe_probe(&result, &verdict);
        metrics.set_best_rate(Some(80));

        let text = metrics.render().unwrap();
        assert!(text.contains("ratescan_probes_total{verdict=\"pass\"} 1"));
        assert!(text.contains("ratescan_requests_total{outcome=\"success\"} 77"));
        assert!(text.contains("ratescan_requests_total{outcome=\"error\"} 3"));
        assert!(text.contains("ratescan_probe_rate 80"));
        assert!(text.contains("ratescan_probe_latency_seconds 0.25"));
        assert!(text.contains("ratescan_best_rate 80"));
    }
}
