//! Latency distribution backed by an HDR histogram

use std::io::{self, Write};
use std::time::Duration;

use hdrhistogram::Histogram;
use tracing::warn;

use crate::error::Result;

/// Highest trackable latency: 1 hour in microseconds
const MAX_LATENCY_US: u64 = 3_600_000_000;

/// Significant decimal digits kept per value
const SIGFIG: u8 = 3;

/// Latency histogram in microseconds
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    inner: Histogram<u64>,
}

impl LatencyHistogram {
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: Histogram::new_with_bounds(1, MAX_LATENCY_US, SIGFIG)?,
        })
    }

    /// Record one latency sample; values beyond the bound are clamped
    pub fn record(&mut self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        if micros > MAX_LATENCY_US {
            warn!("latency {:?} exceeds histogram bound, clamping", latency);
        }
        self.inner.saturating_record(micros);
    }

    /// Number of recorded samples
    pub fn len(&self) -> u64 {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Latency at `percentile` in [0, 100]; `None` on an empty histogram
    pub fn value_at_percentile(&self, percentile: f64) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        let quantile = (percentile / 100.0).clamp(0.0, 1.0);
        Some(Duration::from_micros(self.inner.value_at_quantile(quantile)))
    }

    /// Write the percentile distribution in the HdrHistogram plain-text layout.
    ///
    /// `ticks_per_half_distance` controls the resolution of the percentile
    /// steps, `value_scale` divides every value (1.0 keeps microseconds).
    pub fn write_percentiles<W: Write>(
        &self,
        out: &mut W,
        ticks_per_half_distance: u32,
        value_scale: f64,
    ) -> io::Result<()> {
        writeln!(
            out,
            "{:>12} {:>14} {:>10} {:>14}",
            "Value", "Percentile", "TotalCount", "1/(1-Percentile)"
        )?;
        writeln!(out)?;

        let mut total = 0u64;
        let steps = (!self.is_empty()).then(|| self.inner.iter_quantiles(ticks_per_half_distance));
        for step in steps.into_iter().flatten() {
            total += step.count_since_last_iteration();
            let quantile = step.quantile_iterated_to();
            let value = step.value_iterated_to() as f64 / value_scale;
            if quantile < 1.0 {
                writeln!(
                    out,
                    "{:>12.3} {:>2.12} {:>10} {:>14.2}",
                    value,
                    quantile,
                    total,
                    1.0 / (1.0 - quantile)
                )?;
            } else {
                writeln!(out, "{:>12.3} {:>2.12} {:>10}", value, quantile, total)?;
            }
        }

        let (mean, stdev, max) = if self.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                self.inner.mean() / value_scale,
                self.inner.stdev() / value_scale,
                self.inner.max() as f64 / value_scale,
            )
        };
        writeln!(out, "#[Mean    = {:>12.3}, StdDeviation   = {:>12.3}]", mean, stdev)?;
        writeln!(out, "#[Max     = {:>12.3}, Total count    = {:>12}]", max, self.len())?;
        writeln!(
            out,
            "#[Buckets = {:>12}, SubBuckets     = {:>12}]",
            self.inner.buckets(),
            self.inner.distinct_values()
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(samples: impl IntoIterator<Item = u64>) -> LatencyHistogram {
        let mut hist = LatencyHistogram::new().unwrap();
        for us in samples {
            hist.record(Duration::from_micros(us));
        }
        hist
    }

    #[test]
    fn test_empty_histogram_has_no_quantiles() {
        let hist = LatencyHistogram::new().unwrap();
        assert!(hist.is_empty());
        assert_eq!(hist.value_at_percentile(99.0), None);
    }

    #[test]
    fn test_percentiles() {
        let hist = filled(1..=1000);
        assert_eq!(hist.len(), 1000);

        let p50 = hist.value_at_percentile(50.0).unwrap();
        assert!(p50 >= Duration::from_micros(499) && p50 <= Duration::from_micros(501));

        let p999 = hist.value_at_percentile(99.9).unwrap();
        assert!(p999 >= Duration::from_micros(998) && p999 <= Duration::from_micros(1000));

        let max = hist.value_at_percentile(100.0).unwrap();
        assert_eq!(max, Duration::from_micros(1000));
    }

    #[test]
    fn test_out_of_range_latency_is_clamped() {
        let mut hist = LatencyHistogram::new().unwrap();
        hist.record(Duration::from_secs(7200));
        assert_eq!(hist.len(), 1);
        // Clamped to the top bucket, whose width is a couple of seconds at this magnitude.
        let max = hist.value_at_percentile(100.0).unwrap();
        assert!(max >= Duration::from_secs(3595) && max <= Duration::from_secs(3610));
    }

    #[test]
    fn test_percentile_dump_layout() {
        let hist = filled([100, 200, 300, 400]);
        let mut out = Vec::new();
        hist.write_percentiles(&mut out, 10, 1.0).unwrap();
        let text = String::from_utf8(out).unwrap();

        let first = text.lines().next().unwrap();
        assert!(first.contains("Value") && first.contains("1/(1-Percentile)"));
        assert!(text.contains("#[Mean    ="));
        assert!(text.contains("Total count    =            4]"));

        let rows: Vec<&str> = text
            .lines()
            .skip(2)
            .take_while(|l| !l.starts_with('#'))
            .collect();
        assert!(!rows.is_empty());
        let last_total: u64 = rows
            .last()
            .unwrap()
            .split_whitespace()
            .nth(2)
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(last_total, 4);
    }
}
