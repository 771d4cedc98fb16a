// Property-based tests for randomized trigger time generation

use chrono::{Duration, NaiveDate, Timelike};
use common::trigger::{bounded_random_interval, diff_minutes, even_segmented};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
}

/// *For any* window and interval bounds, the bounded walk yields at most the requested
/// number of strictly increasing points, each a valid step from the previous one and
/// never past the end hour.
#[test]
fn property_bounded_interval_stays_in_window() {
    proptest!(|(
        seed in any::<u64>(),
        num in 0u32..40,
        begin in 0u32..23,
        span in 1u32..12,
        min in 1u32..90,
        extra in 0u32..90,
    )| {
        let end = (begin + span).min(24);
        let max = min + extra;
        let mut rng = StdRng::seed_from_u64(seed);

        let points = bounded_random_interval(&mut rng, day(), num, begin, end, min, max).unwrap();
        prop_assert!(points.len() <= num as usize);

        let mut previous = day().and_hms_opt(begin, 0, 0).unwrap();
        for point in &points {
            let step = *point - previous;
            prop_assert!(step >= Duration::minutes(i64::from(min)));
            prop_assert!(step <= Duration::minutes(i64::from(max)));
            prop_assert!(point.hour() <= end);
            prop_assert_eq!(point.date(), day());
            previous = *point;
        }
    });
}

/// *For any* window that fits the requested executions, even segmentation yields exactly
/// one point per segment, in order.
#[test]
fn property_even_segmented_one_point_per_segment() {
    proptest!(|(
        seed in any::<u64>(),
        begin in 0u32..23,
        span in 1u32..12,
        num in 1u32..60,
    )| {
        let end = (begin + span).min(24);
        let total = (end - begin) * 60;
        prop_assume!(num <= total);

        let mut rng = StdRng::seed_from_u64(seed);
        let points = even_segmented(&mut rng, day(), num, begin, end).unwrap();
        prop_assert_eq!(points.len(), num as usize);

        let start = day().and_hms_opt(begin, 0, 0).unwrap();
        let segment = i64::from(total / num);
        for (i, point) in points.iter().enumerate() {
            let offset = (*point - start).num_minutes();
            prop_assert!(offset >= segment * i as i64);
            prop_assert!(offset < segment * (i as i64 + 1));
        }
        prop_assert!(points.windows(2).all(|pair| pair[0] < pair[1]));
    });
}

/// *For any* window too small for the requested executions, even segmentation is rejected.
#[test]
fn property_even_segmented_rejects_overfull_window() {
    proptest!(|(
        seed in any::<u64>(),
        begin in 0u32..23,
        overflow in 1u32..100,
    )| {
        let mut rng = StdRng::seed_from_u64(seed);
        let num = 60 + overflow;
        prop_assert!(even_segmented(&mut rng, day(), num, begin, begin + 1).is_err());
    });
}

/// *For any* pair of instants, the minute difference is antisymmetric.
#[test]
fn property_diff_minutes_antisymmetric() {
    proptest!(|(a in 0i64..10_000_000, b in 0i64..10_000_000)| {
        let base = day().and_hms_opt(0, 0, 0).unwrap().and_utc();
        let x = base + Duration::seconds(a);
        let y = base + Duration::seconds(b);
        prop_assert_eq!(diff_minutes(x, y), -diff_minutes(y, x));
    });
}
