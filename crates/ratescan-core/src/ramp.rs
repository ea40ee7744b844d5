//! Stepped ramp-up towards a probe's target rate

use std::time::Duration;

/// One ramp step: drive the generator at `rate` for `duration`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampStep {
    pub rate: u32,
    pub duration: Duration,
}

/// Split a ramp budget into increasing sub-rates ending at `target_rate`.
///
/// The step count is clamped so every step lasts at least one whole second.
/// The last step absorbs the rounding remainder, so durations sum to `ramp`.
pub fn schedule(target_rate: u32, ramp: Duration, step_count: u32) -> Vec<RampStep> {
    let whole_secs = u32::try_from(ramp.as_secs()).unwrap_or(u32::MAX);
    let steps = step_count.min(whole_secs);
    if steps == 0 || target_rate == 0 {
        return Vec::new();
    }

    let step_duration = ramp / steps;
    let mut remaining = ramp;

    (1..=steps)
        .map(|i| {
            let duration = if i == steps { remaining } else { step_duration };
            remaining -= duration;

            let rate = (u64::from(target_rate) * u64::from(i)).div_ceil(u64::from(steps));
            RampStep {
                rate: (rate as u32).clamp(1, target_rate),
                duration,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_ramp_is_empty() {
        assert!(schedule(100, Duration::ZERO, 5).is_empty());
        assert!(schedule(100, Duration::from_secs(10), 0).is_empty());
    }

    #[test]
    fn test_sub_second_ramp_is_empty() {
        assert!(schedule(100, Duration::from_millis(900), 5).is_empty());
    }

    #[test]
    fn test_even_split() {
        let steps = schedule(100, Duration::from_secs(10), 5);
        let rates: Vec<u32> = steps.iter().map(|s| s.rate).collect();
        assert_eq!(rates, vec![20, 40, 60, 80, 100]);
        assert!(steps.iter().all(|s| s.duration == Duration::from_secs(2)));
    }

    #[test]
    fn test_steps_clamped_to_whole_seconds() {
        let steps = schedule(90, Duration::from_secs(3), 10);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps.last().unwrap().rate, 90);
    }

    #[test]
    fn test_low_rates_round_up() {
        let steps = schedule(3, Duration::from_secs(5), 5);
        let rates: Vec<u32> = steps.iter().map(|s| s.rate).collect();
        assert_eq!(rates, vec![1, 2, 2, 3, 3]);
    }

    #[test]
    fn test_remainder_goes_to_last_step() {
        let steps = schedule(10, Duration::from_millis(3500), 3);
        let total: Duration = steps.iter().map(|s| s.duration).sum();
        assert_eq!(total, Duration::from_millis(3500));
    }

    proptest! {
        #[test]
        fn prop_schedule_invariants(
            target in 1u32..1_000_000,
            ramp_ms in 0u64..600_000,
            step_count in 0u32..64,
        ) {
            let ramp = Duration::from_millis(ramp_ms);
            let steps = schedule(target, ramp, step_count);

            prop_assert!(steps.len() as u64 <= ramp.as_secs());
            prop_assert!(steps.len() as u32 <= step_count);

            if let Some(last) = steps.last() {
                prop_assert_eq!(last.rate, target);
                let total: Duration = steps.iter().map(|s| s.duration).sum();
                prop_assert_eq!(total, ramp);
            }
            for pair in steps.windows(2) {
                prop_assert!(pair[0].rate <= pair[1].rate);
            }
            for step in &steps {
                prop_assert!(step.rate >= 1 && step.rate <= target);
                prop_assert!(step.duration >= Duration::from_secs(1));
            }
        }
    }
}
