//! Capacity search over candidate rates
//!
//! The search runs in two phases over a single [`SearchState`]:
//!
//! 1. **Growth**: starting at the configured rate, every passing probe
//!    multiplies the candidate by the climb multiple (rounded up). The first
//!    failing probe ends the phase and becomes the failing bound.
//! 2. **Refinement**: binary search between the last passing and the first
//!    failing rate until `ok / (nok - 1)` reaches the accuracy band or the
//!    bounds are one request per second apart.
//!
//! Probes run strictly one after another since each verdict decides the next
//! candidate.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::SearchConfig;
use crate::error::Result;
use crate::probe::Prober;
use crate::sla::Verdict;

/// Bounds of the search, narrowed monotonically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchState {
    /// Highest rate known to pass; starts at 1 as an assumed floor
    pub ok_rate: u32,

    /// Lowest rate known to fail
    pub nok_rate: Option<u32>,

    /// Whether `ok_rate` was confirmed by a passing probe
    pub ok_verified: bool,
}

impl Default for SearchState {
    fn default() -> Self {
        Self {
            ok_rate: 1,
            nok_rate: None,
            ok_verified: false,
        }
    }
}

impl SearchState {
    pub fn record_pass(&mut self, rate: u32) {
        debug_assert!(rate >= self.ok_rate, "ok rate must not decrease");
        debug_assert!(self.nok_rate.map_or(true, |nok| rate < nok));
        self.ok_rate = rate;
        self.ok_verified = true;
    }

    pub fn record_fail(&mut self, rate: u32) {
        debug_assert!(self.nok_rate.map_or(true, |nok| rate <= nok), "nok rate must not increase");
        self.nok_rate = Some(rate);
    }

    /// Whether the refinement phase can stop.
    ///
    /// Holds trivially while no failing bound exists or when the bounds are
    /// adjacent, so the ratio is only computed with `nok - 1 > ok >= 1`.
    pub fn converged(&self, accuracy: f64) -> bool {
        match self.nok_rate {
            None => true,
            Some(nok) if nok <= self.ok_rate.saturating_add(1) => true,
            Some(nok) => f64::from(self.ok_rate) / f64::from(nok - 1) >= accuracy,
        }
    }
}

/// Final answer of a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcome {
    /// The maximum working rate, exactly
    Exact(u32),
    /// The maximum working rate lies within `[low, high]`
    Range { low: u32, high: u32 },
    /// The configured ceiling itself passed
    CeilingReached(u32),
    /// No rate, 1 req/sec included, satisfied the SLA
    NoWorkingRate,
}

impl SearchOutcome {
    /// Rate whose artifacts represent the answer
    pub fn best_rate(&self) -> Option<u32> {
        match *self {
            Self::Exact(rate) | Self::CeilingReached(rate) => Some(rate),
            Self::Range { low, .. } => Some(low),
            Self::NoWorkingRate => None,
        }
    }
}

/// Which part of the search issued a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Growth,
    Refinement,
    /// Confirmation of the assumed floor of 1 req/sec
    Floor,
}

/// One probe as seen by the search
#[derive(Debug, Clone, Serialize)]
pub struct ProbeRecord {
    pub phase: SearchPhase,
    pub rate: u32,
    pub verdict: Verdict,
    /// State after applying the verdict
    pub state: SearchState,
}

/// Everything a finished search produced
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub outcome: SearchOutcome,
    pub state: SearchState,
    pub probes: Vec<ProbeRecord>,
}

/// Next growth candidate: `ceil(rate * multiple)`, strictly above `rate`, capped at `ceiling`
pub fn next_rate(rate: u32, multiple: f64, ceiling: u32) -> u32 {
    let grown = (f64::from(rate) * multiple).ceil();
    let grown = if grown >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        grown as u32
    };
    grown.max(rate.saturating_add(1)).min(ceiling)
}

/// Drives a [`Prober`] through growth and refinement
pub struct RateSearch<P> {
    prober: P,
    config: SearchConfig,
    accuracy: f64,
    state: SearchState,
    probes: Vec<ProbeRecord>,
}

impl<P: Prober> RateSearch<P> {
    /// `accuracy` is the band as a fraction in (0, 1]
    pub fn new(prober: P, config: SearchConfig, accuracy: f64) -> Self {
        Self {
            prober,
            config,
            accuracy,
            state: SearchState::default(),
            probes: Vec::new(),
        }
    }

    /// Run the search to completion and promote the winning artifact
    pub async fn run(mut self) -> Result<SearchReport> {
        let outcome = self.search().await?;

        if let Some(best) = outcome.best_rate() {
            self.prober.promote_best(best)?;
        }

        let report = SearchReport {
            outcome,
            state: self.state,
            probes: self.probes,
        };
        self.prober.search_finished(&report)?;
        Ok(report)
    }

    async fn search(&mut self) -> Result<SearchOutcome> {
        let ceiling = self.config.max_rate.unwrap_or(u32::MAX);

        // Phase 1: grow until the first failure.
        let mut rate = self.config.start_rate.min(ceiling);
        info!("Growth phase from {} req/sec (x{})", rate, self.config.climb_multiple);
        let nok = loop {
            if self.probe(SearchPhase::Growth, rate).await? {
                if rate >= ceiling {
                    info!("Ceiling of {} req/sec sustained", rate);
                    return Ok(SearchOutcome::CeilingReached(rate));
                }
                rate = next_rate(rate, self.config.climb_multiple, ceiling);
            } else {
                break rate;
            }
        };

        if nok <= 1 {
            warn!("Rate 1 req/sec already fails the SLA");
            return Ok(SearchOutcome::NoWorkingRate);
        }

        // Phase 2: binary search between the bounds.
        info!(
            "Refinement phase between {} and {} req/sec",
            self.state.ok_rate, nok
        );
        while !self.state.converged(self.accuracy) {
            let Some(nok) = self.state.nok_rate else {
                break;
            };
            let candidate = ((u64::from(self.state.ok_rate) + u64::from(nok)) / 2) as u32;
            self.probe(SearchPhase::Refinement, candidate).await?;
        }

        // The floor of 1 req/sec is only assumed until a probe passes there.
        if !self.state.ok_verified {
            let floor = self.state.ok_rate;
            info!("Confirming floor of {} req/sec", floor);
            if !self.probe_floor(floor).await? {
                return Ok(SearchOutcome::NoWorkingRate);
            }
        }

        let ok = self.state.ok_rate;
        let high = self.state.nok_rate.map_or(ok, |nok| nok - 1);
        if high == ok {
            Ok(SearchOutcome::Exact(ok))
        } else {
            Ok(SearchOutcome::Range { low: ok, high })
        }
    }

    /// Probe `rate` and fold the verdict into the state
    async fn probe(&mut self, phase: SearchPhase, rate: u32) -> Result<bool> {
        let verdict = self.prober.probe(rate).await?;
        let pass = verdict.pass;
        if pass {
            self.state.record_pass(rate);
        } else {
            self.state.record_fail(rate);
        }
        self.probes.push(ProbeRecord {
            phase,
            rate,
            verdict,
            state: self.state,
        });
        Ok(pass)
    }

    /// Probe the assumed floor without narrowing the failing bound onto it
    async fn probe_floor(&mut self, rate: u32) -> Result<bool> {
        let verdict = self.prober.probe(rate).await?;
        let pass = verdict.pass;
        if pass {
            self.state.ok_verified = true;
        }
        self.probes.push(ProbeRecord {
            phase: SearchPhase::Floor,
            rate,
            verdict,
            state: self.state,
        });
        Ok(pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sla::VerdictReason;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Passes every rate up to `capacity`
    struct Threshold {
        capacity: u32,
        probed: Vec<u32>,
        promoted: Option<u32>,
    }

    impl Threshold {
        fn new(capacity: u32) -> Self {
            Self {
                capacity,
                probed: Vec::new(),
                promoted: None,
            }
        }
    }

    #[async_trait]
    impl Prober for Threshold {
        async fn probe(&mut self, rate: u32) -> Result<Verdict> {
            self.probed.push(rate);
            let pass = rate <= self.capacity;
            Ok(Verdict {
                pass,
                latency: Some(Duration::from_millis(1)),
                percentile: 99.9,
                reason: if pass {
                    VerdictReason::WithinSla
                } else {
                    VerdictReason::LatencyExceeded
                },
            })
        }

        fn promote_best(&mut self, rate: u32) -> Result<()> {
            self.promoted = Some(rate);
            Ok(())
        }
    }

    fn config(start_rate: u32) -> SearchConfig {
        SearchConfig {
            start_rate,
            climb_multiple: 2.0,
            max_rate: None,
            duration: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_next_rate() {
        assert_eq!(next_rate(20, 2.0, u32::MAX), 40);
        assert_eq!(next_rate(3, 1.5, u32::MAX), 5);
        assert_eq!(next_rate(1, 1.01, u32::MAX), 2);
        assert_eq!(next_rate(100, 2.0, 150), 150);
        assert_eq!(next_rate(u32::MAX - 1, 2.0, u32::MAX), u32::MAX);
    }

    #[test]
    fn test_converged() {
        let mut state = SearchState::default();
        assert!(state.converged(1.0));

        state.record_pass(80);
        state.record_fail(160);
        assert!(!state.converged(1.0));
        assert!(!state.converged(0.6));
        assert!(state.converged(0.5));

        state.record_fail(81);
        assert!(state.converged(1.0));

        let collapsed = SearchState {
            ok_rate: 1,
            nok_rate: Some(1),
            ok_verified: false,
        };
        assert!(collapsed.converged(1.0));
    }

    #[tokio::test]
    async fn test_exact_search() {
        let mut prober = Threshold::new(113);
        let report = RateSearch::new(&mut prober, config(20), 1.0).run().await.unwrap();

        assert_eq!(report.outcome, SearchOutcome::Exact(113));
        assert_eq!(&prober.probed[..4], &[20, 40, 80, 160]);
        assert_eq!(prober.promoted, Some(113));
    }

    #[tokio::test]
    async fn test_accuracy_band_reports_range() {
        let mut prober = Threshold::new(113);
        let report = RateSearch::new(&mut prober, config(20), 0.9).run().await.unwrap();

        let SearchOutcome::Range { low, high } = report.outcome else {
            panic!("expected a range, got {:?}", report.outcome);
        };
        assert!(low <= 113 && 113 <= high);
        assert!(f64::from(low) / f64::from(high) >= 0.9);
        assert_eq!(prober.promoted, Some(low));
    }

    #[tokio::test]
    async fn test_rate_one_failing_is_no_working_rate() {
        let mut prober = Threshold::new(0);
        let report = RateSearch::new(&mut prober, config(1), 1.0).run().await.unwrap();

        assert_eq!(report.outcome, SearchOutcome::NoWorkingRate);
        assert_eq!(prober.probed, vec![1]);
        assert_eq!(prober.promoted, None);
    }

    #[tokio::test]
    async fn test_unverified_floor_is_confirmed() {
        let mut prober = Threshold::new(0);
        let report = RateSearch::new(&mut prober, config(20), 1.0).run().await.unwrap();

        assert_eq!(report.outcome, SearchOutcome::NoWorkingRate);
        assert_eq!(prober.probed, vec![20, 10, 5, 3, 2, 1]);
        assert_eq!(report.probes.last().unwrap().phase, SearchPhase::Floor);
        assert_eq!(prober.promoted, None);

        let mut prober = Threshold::new(1);
        let report = RateSearch::new(&mut prober, config(20), 1.0).run().await.unwrap();
        assert_eq!(report.outcome, SearchOutcome::Exact(1));
        assert_eq!(prober.promoted, Some(1));
    }

    #[tokio::test]
    async fn test_ceiling_reached() {
        let mut prober = Threshold::new(10_000);
        let mut config = config(20);
        config.max_rate = Some(100);
        let report = RateSearch::new(&mut prober, config, 1.0).run().await.unwrap();

        assert_eq!(report.outcome, SearchOutcome::CeilingReached(100));
        assert_eq!(prober.probed, vec![20, 40, 80, 100]);
        assert_eq!(prober.promoted, Some(100));
    }

    #[tokio::test]
    async fn test_ceiling_failing_refines_below_it() {
        let mut prober = Threshold::new(90);
        let mut config = config(20);
        config.max_rate = Some(100);
        let report = RateSearch::new(&mut prober, config, 1.0).run().await.unwrap();
        assert_eq!(report.outcome, SearchOutcome::Exact(90));
    }
}
