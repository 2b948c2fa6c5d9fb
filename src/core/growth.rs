//! Multiplier Growth Curve
//!
//! Maps elapsed round time to the current payout multiplier and back.
//! Multipliers are integers in hundredths (100 = 1.00x) everywhere in the
//! crate; floats only appear inside these two functions.

/// Minimum multiplier (1.00x) in hundredths.
pub const MIN_MULTIPLIER: u64 = 100;

/// Default growth constant per millisecond.
///
/// At this rate the curve reaches 2.00x after ~11.5s and 10.00x after ~38s.
pub const DEFAULT_GROWTH_K: f64 = 0.00006;

/// Current multiplier (hundredths) after `elapsed_ms` of play.
///
/// `floor(100 * e^(k * ms))`, clamped to [`MIN_MULTIPLIER`].
/// Monotonic non-decreasing in `elapsed_ms`.
pub fn growth_multiplier(elapsed_ms: u64, k: f64) -> u64 {
    let value = (100.0 * (k * elapsed_ms as f64).exp()).floor() as u64;
    value.max(MIN_MULTIPLIER)
}

/// Exact algebraic inverse of the growth curve, in fractional milliseconds.
///
/// Not iteratively approximated: `growth_multiplier` is `floor(100 * e^(k*t))`
/// and this returns the `t` satisfying `100 * e^(k*t) = multiplier`.
pub fn duration_ms_exact(multiplier: u64, k: f64) -> f64 {
    if multiplier <= MIN_MULTIPLIER {
        return 0.0;
    }
    (multiplier as f64 / 100.0).ln() / k
}

/// Milliseconds of play needed before the curve reaches `multiplier`.
///
/// Rounded up to a whole millisecond, so `growth_multiplier(duration_ms(m))`
/// is always `>= m`. The engine uses `duration_ms(crash_point + 1)` as the
/// round run time: the final wakeup lands just past the crash boundary,
/// never short of it.
pub fn duration_ms(multiplier: u64, k: f64) -> u64 {
    duration_ms_exact(multiplier, k).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn starts_at_one() {
        assert_eq!(growth_multiplier(0, DEFAULT_GROWTH_K), 100);
        assert_eq!(duration_ms(100, DEFAULT_GROWTH_K), 0);
        assert_eq!(duration_ms(50, DEFAULT_GROWTH_K), 0);
    }

    #[test]
    fn monotonic_over_first_minute() {
        let mut last = 0;
        for ms in (0..60_000).step_by(50) {
            let m = growth_multiplier(ms, DEFAULT_GROWTH_K);
            assert!(m >= last, "curve decreased at {}ms: {} < {}", ms, m, last);
            assert!(m >= MIN_MULTIPLIER);
            last = m;
        }
    }

    #[test]
    fn tuned_constant_hits_250_at_ten_seconds() {
        // k chosen so duration(250) == 10_000ms.
        let k = (2.5f64).ln() / 10_000.0;
        assert_eq!(duration_ms(250, k), 10_000);

        // Halfway through, the multiplier is strictly between 1.00x and 2.50x.
        let halfway = growth_multiplier(5_000, k);
        assert!(halfway > 100 && halfway < 250, "halfway = {}", halfway);

        // Past the run time for crash point 250, the curve has exceeded it.
        let run_time = duration_ms(251, k);
        assert!(run_time >= 10_000);
        assert!(growth_multiplier(run_time, k) > 250);
    }

    #[test]
    fn duration_rounds_up_not_down() {
        for m in [101, 150, 200, 999, 5_000, 100_000] {
            let t = duration_ms(m, DEFAULT_GROWTH_K);
            assert!(
                growth_multiplier(t, DEFAULT_GROWTH_K) >= m,
                "curve at duration({}) fell short",
                m
            );
        }
    }

    proptest! {
        #[test]
        fn exact_inverse_round_trips_within_one_hundredth(m in 100u64..=100_000) {
            let t = duration_ms_exact(m, DEFAULT_GROWTH_K);
            let recovered = 100.0 * (DEFAULT_GROWTH_K * t).exp();
            prop_assert!((recovered - m as f64).abs() <= 1.0,
                "m = {}, recovered = {}", m, recovered);
        }

        #[test]
        fn never_below_minimum(ms in 0u64..10_000_000) {
            prop_assert!(growth_multiplier(ms, DEFAULT_GROWTH_K) >= MIN_MULTIPLIER);
        }
    }
}
