//! Property-based tests for backoff and jitter bounds

use proptest::prelude::*;
use std::time::Duration;

use breakwater::{Backoff, JitterCalculator, JitterStrategy, RetryOptions};

fn millis() -> impl Strategy<Value = Duration> {
    (1u64..10_000).prop_map(Duration::from_millis)
}

proptest! {
    #[test]
    fn prop_exponential_delay_is_doubling_capped(
        base_ms in 1u64..1_000,
        cap_ms in 1u64..100_000,
        attempt in 1u32..20,
    ) {
        let base = Duration::from_millis(base_ms);
        let cap = Duration::from_millis(cap_ms.max(base_ms));
        let options = RetryOptions::exponential(base).with_max_delay(cap);

        let expected = Duration::from_millis(base_ms * (1u64 << (attempt - 1))).min(cap);
        prop_assert_eq!(options.delay_for_attempt(attempt), expected);
    }

    #[test]
    fn prop_backoff_never_decreases(
        base in millis(),
        attempt in 1u32..30,
    ) {
        for backoff in [Backoff::Constant, Backoff::Linear, Backoff::Exponential, Backoff::Fibonacci] {
            prop_assert!(backoff.delay(base, attempt + 1) >= backoff.delay(base, attempt));
        }
    }

    #[test]
    fn prop_backoff_saturates_instead_of_overflowing(
        attempt in prop_oneof![1u32..200, (u32::MAX - 16)..u32::MAX],
    ) {
        let base = Duration::from_secs(u64::MAX / 4);
        for backoff in [Backoff::Linear, Backoff::Exponential, Backoff::Fibonacci] {
            prop_assert!(backoff.delay(base, attempt) >= base);
        }
    }

    #[test]
    fn prop_full_jitter_stays_below_base(
        base in millis(),
        sample in 0.0f64..1.0,
    ) {
        let mut jitter = JitterCalculator::new(JitterStrategy::Full).with_random(move || sample);
        prop_assert!(jitter.calculate(base, Duration::from_secs(60)) <= base);
    }

    #[test]
    fn prop_equal_jitter_keeps_half(
        base in millis(),
        sample in 0.0f64..1.0,
    ) {
        let mut jitter = JitterCalculator::new(JitterStrategy::Equal).with_random(move || sample);
        let delay = jitter.calculate(base, Duration::from_secs(60));
        prop_assert!(delay >= base / 2);
        prop_assert!(delay <= base);
    }

    #[test]
    fn prop_decorrelated_jitter_stays_within_bounds(
        base in millis(),
        cap in millis(),
        samples in prop::collection::vec(0.0f64..1.0, 1..20),
    ) {
        let mut jitter = JitterCalculator::new(JitterStrategy::Decorrelated);
        for sample in samples {
            jitter = jitter.with_random(move || sample);
            let delay = jitter.calculate(base, cap);
            prop_assert!(delay <= cap);
            prop_assert!(delay >= base.min(cap));
        }
    }

    #[test]
    fn prop_out_of_range_samples_are_clamped(
        base in millis(),
        sample in prop::num::f64::ANY,
    ) {
        let mut jitter = JitterCalculator::new(JitterStrategy::Full).with_random(move || sample);
        prop_assert!(jitter.calculate(base, Duration::from_secs(60)) <= base);
    }
}
