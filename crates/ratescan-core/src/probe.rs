//! Single-rate probes: ramp, measure, judge

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::artifact::ArtifactStore;
use crate::config::RampConfig;
use crate::error::Result;
use crate::generator::{drain, LoadGenerator};
use crate::histogram::LatencyHistogram;
use crate::metrics::SearchMetrics;
use crate::ramp;
use crate::report::Reporter;
use crate::search::SearchReport;
use crate::sla::{SlaEvaluator, Verdict};

/// Aggregated outcome stream of one measurement run
#[derive(Debug, Clone)]
pub struct MeasurementResult {
    /// Requested rate
    pub rate: u32,

    /// Latencies of successful requests only
    pub histogram: LatencyHistogram,

    pub error_count: u64,
    pub total_count: u64,

    /// Requests per second actually delivered
    pub achieved_rate: f64,
}

impl MeasurementResult {
    pub fn success_count(&self) -> u64 {
        self.total_count - self.error_count
    }

    /// Successful share of all requests, in percent (0 when nothing was sent)
    pub fn success_percent(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        self.success_count() as f64 * 100.0 / self.total_count as f64
    }

    /// Error share of all requests, in percent
    pub fn error_percent(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        self.error_count as f64 * 100.0 / self.total_count as f64
    }
}

/// Anything that can judge a candidate rate
#[async_trait]
pub trait Prober: Send {
    /// Run one probe at `rate` to completion
    async fn probe(&mut self, rate: u32) -> Result<Verdict>;

    /// Mark the artifacts of `rate` as the final answer
    fn promote_best(&mut self, rate: u32) -> Result<()>;

    /// Called once with the final report
    fn search_finished(&mut self, _report: &SearchReport) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<'a, P: Prober + ?Sized> Prober for &'a mut P {
    async fn probe(&mut self, rate: u32) -> Result<Verdict> {
        (**self).probe(rate).await
    }

    fn promote_best(&mut self, rate: u32) -> Result<()> {
        (**self).promote_best(rate)
    }

    fn search_finished(&mut self, report: &SearchReport) -> Result<()> {
        (**self).search_finished(report)
    }
}

/// Probe executor backed by a [`LoadGenerator`]
pub struct LoadProbeExecutor<G> {
    generator: G,
    duration: Duration,
    ramp: RampConfig,
    evaluator: SlaEvaluator,
    artifacts: ArtifactStore,
    reporter: Box<dyn Reporter>,
    metrics: Arc<SearchMetrics>,
}

impl<G: LoadGenerator> LoadProbeExecutor<G> {
    pub fn new(
        generator: G,
        duration: Duration,
        ramp: RampConfig,
        evaluator: SlaEvaluator,
        artifacts: ArtifactStore,
        reporter: Box<dyn Reporter>,
        metrics: Arc<SearchMetrics>,
    ) -> Self {
        Self {
            generator,
            duration,
            ramp,
            evaluator,
            artifacts,
            reporter,
            metrics,
        }
    }

    /// Drive the ramp schedule ahead of `rate`, discarding every outcome
    async fn ramp_up(&self, rate: u32) {
        let steps = ramp::schedule(rate, self.ramp.duration, self.ramp.steps);
        if steps.is_empty() {
            return;
        }

        info!("Ramping up to {} req/sec over {:?}", rate, self.ramp.duration);
        for (i, step) in steps.iter().enumerate() {
            let discarded = drain(&self.generator, step.rate, step.duration).await;
            debug!(
                "Ramp-up step {}/{}: {} req/sec for {:?} ({} requests discarded)",
                i + 1,
                steps.len(),
                step.rate,
                step.duration,
                discarded
            );
        }
    }

    /// Run the measurement phase at `rate` and aggregate its outcomes
    pub async fn measure(&self, rate: u32) -> Result<MeasurementResult> {
        let mut histogram = LatencyHistogram::new()?;
        let mut error_count = 0u64;
        let mut total_count = 0u64;
        let mut first_issued: Option<Duration> = None;
        let mut last_issued = Duration::ZERO;

        let mut outcomes = self.generator.attack(rate, self.duration);
        while let Some(outcome) = outcomes.recv().await {
            total_count += 1;
            first_issued = Some(first_issued.map_or(outcome.issued_at, |t| t.min(outcome.issued_at)));
            last_issued = last_issued.max(outcome.issued_at);

            if outcome.is_success() {
                histogram.record(outcome.latency);
            } else {
                error_count += 1;
                if let Some(error) = &outcome.error {
                    debug!("request failed: {}", error);
                }
            }
        }

        let span = first_issued.map_or(Duration::ZERO, |first| last_issued - first);
        let achieved_rate = if span.is_zero() {
            0.0
        } else {
            total_count as f64 / span.as_secs_f64()
        };

        Ok(MeasurementResult {
            rate,
            histogram,
            error_count,
            total_count,
            achieved_rate,
        })
    }
}

#[async_trait]
impl<G: LoadGenerator> Prober for LoadProbeExecutor<G> {
    async fn probe(&mut self, rate: u32) -> Result<Verdict> {
        self.reporter.probe_started(rate, self.duration);

        self.ramp_up(rate).await;
        let result = self.measure(rate).await?;
        self.artifacts.write(rate, &result.histogram)?;

        let verdict = self.evaluator.evaluate(&result);
        info!(
            rate,
            total = result.total_count,
            errors = result.error_count,
            achieved_rate = result.achieved_rate,
            percentile = verdict.percentile,
            pass = verdict.pass,
            "probe finished: {}",
            verdict.reason
        );

        self.metrics.observe_probe(&result, &verdict);
        self.reporter.probe_finished(&result, &verdict);
        Ok(verdict)
    }

    fn promote_best(&mut self, rate: u32) -> Result<()> {
        self.artifacts.promote_best(rate).map(|_| ())
    }

    fn search_finished(&mut self, report: &SearchReport) -> Result<()> {
        self.metrics.set_best_rate(report.outcome.best_rate());
        self.reporter.search_finished(report);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SlaConfig, VerdictPolicy};
    use crate::generator::Outcome;
    use crate::report::test_support::RecordingReporter;
    use crate::sla::VerdictReason;
    use parking_lot::Mutex;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Replays a fixed outcome list per attack and logs every call
    struct ScriptedGenerator {
        outcomes: Vec<Outcome>,
        calls: Arc<Mutex<Vec<(u32, Duration)>>>,
    }

    impl LoadGenerator for ScriptedGenerator {
        fn attack(&self, rate: u32, duration: Duration) -> mpsc::Receiver<Outcome> {
            self.calls.lock().push((rate, duration));
            let (tx, rx) = mpsc::channel(self.outcomes.len().max(1));
            for outcome in &self.outcomes {
                tx.try_send(outcome.clone()).unwrap();
            }
            rx
        }
    }

    /// `successes` fast outcomes then `errors` 500s, evenly spread over one second
    fn outcomes(successes: u32, errors: u32) -> Vec<Outcome> {
        let total = successes + errors;
        (0..total)
            .map(|i| {
                let issued_at = Duration::from_secs(1) * i / total.max(1);
                if i < successes {
                    Outcome::with_status(200, Duration::from_millis(5), issued_at)
                } else {
                    Outcome::with_status(500, Duration::from_millis(1), issued_at)
                }
            })
            .collect()
    }

    fn executor(
        outcomes: Vec<Outcome>,
        ramp: RampConfig,
        dir: &TempDir,
    ) -> (LoadProbeExecutor<ScriptedGenerator>, Arc<Mutex<Vec<(u32, Duration)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let generator = ScriptedGenerator {
            outcomes,
            calls: calls.clone(),
        };
        let evaluator = SlaEvaluator::new(SlaConfig {
            max_latency: Duration::from_millis(100),
            target_percentile: 99.0,
            policy: VerdictPolicy::ErrorAdjusted,
            ..Default::default()
        });
        let executor = LoadProbeExecutor::new(
            generator,
            Duration::from_secs(1),
            ramp,
            evaluator,
            ArtifactStore::new(dir.path()).unwrap(),
            Box::new(RecordingReporter::default()),
            Arc::new(SearchMetrics::new().unwrap()),
        );
        (executor, calls)
    }

    #[tokio::test]
    async fn test_measurement_counts_and_histogram() {
        let temp_dir = TempDir::new().unwrap();
        let (executor, _) = executor(outcomes(90, 10), RampConfig::default(), &temp_dir);

        let result = executor.measure(100).await.unwrap();
        assert_eq!(result.total_count, 100);
        assert_eq!(result.error_count, 10);
        assert_eq!(result.success_count(), 90);
        assert_eq!(result.histogram.len(), 90);
        assert!((result.success_percent() - 90.0).abs() < 1e-9);
        // 100 requests issued over 0.99s
        assert!((result.achieved_rate - 100.0 / 0.99).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_single_request_has_no_rate() {
        let temp_dir = TempDir::new().unwrap();
        let (executor, _) = executor(outcomes(1, 0), RampConfig::default(), &temp_dir);
        let result = executor.measure(1).await.unwrap();
        assert_eq!(result.total_count, 1);
        assert_eq!(result.achieved_rate, 0.0);
    }

    #[tokio::test]
    async fn test_probe_ramps_then_measures_and_writes_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let ramp = RampConfig {
            duration: Duration::from_secs(4),
            steps: 2,
        };
        let (mut executor, calls) = executor(outcomes(100, 0), ramp, &temp_dir);

        let verdict = executor.probe(100).await.unwrap();
        assert!(verdict.pass);

        let calls = calls.lock().clone();
        assert_eq!(
            calls,
            vec![
                (50, Duration::from_secs(2)),
                (100, Duration::from_secs(2)),
                (100, Duration::from_secs(1)),
            ]
        );
        assert!(temp_dir.path().join("lat_100.txt").exists());
    }

    #[tokio::test]
    async fn test_ramp_outcomes_do_not_affect_verdict() {
        // Every attack replays the same script, ramp included: the verdict must
        // only reflect the measurement run's 100 requests.
        let temp_dir = TempDir::new().unwrap();
        let ramp = RampConfig {
            duration: Duration::from_secs(3),
            steps: 3,
        };
        let (mut executor, _) = executor(outcomes(100, 0), ramp, &temp_dir);
        let verdict = executor.probe(100).await.unwrap();
        assert!(verdict.pass);
        assert_eq!(verdict.percentile, 99.0);
    }

    #[tokio::test]
    async fn test_probe_fails_on_error_rate() {
        let temp_dir = TempDir::new().unwrap();
        let (mut executor, _) = executor(outcomes(95, 5), RampConfig::default(), &temp_dir);

        let verdict = executor.probe(100).await.unwrap();
        assert!(!verdict.pass);
        assert_eq!(verdict.reason, VerdictReason::TooManyErrors);

        executor.promote_best(100).unwrap();
        assert!(temp_dir.path().join("lat_100_best.txt").exists());
    }
}
