// Randomized trigger time generation
//
// Produces the trigger times for one scheduling day inside an hour window.
// Two strategies are supported:
// - bounded random interval: walk forward from the window start by random steps
// - even segmented: one random minute inside each equal slice of the window
//
// The generators take the day and the RNG explicitly so callers (and tests)
// control both; `random_scheduler` / `random_even_scheduler` use today and
// the thread RNG.

use crate::errors::ScheduleError;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, Timelike, Utc};
use rand::Rng;

/// Ordered trigger times for one scheduling window
pub type TriggerSchedule = Vec<NaiveDateTime>;

const MINUTES_PER_HOUR: u32 = 60;

fn window_start(day: NaiveDate, begin_hour: u32) -> Result<NaiveDateTime, ScheduleError> {
    day.and_hms_opt(begin_hour, 0, 0).ok_or_else(|| {
        ScheduleError::InvalidConfiguration(format!("begin hour {} is out of range", begin_hour))
    })
}

fn validate_window(begin_hour: u32, end_hour: u32) -> Result<(), ScheduleError> {
    if begin_hour > 23 {
        return Err(ScheduleError::InvalidConfiguration(format!(
            "begin hour {} must be within 0..=23",
            begin_hour
        )));
    }
    if end_hour > 24 {
        return Err(ScheduleError::InvalidConfiguration(format!(
            "end hour {} must be within 0..=24",
            end_hour
        )));
    }
    if begin_hour >= end_hour {
        return Err(ScheduleError::InvalidConfiguration(format!(
            "begin hour {} must be before end hour {}",
            begin_hour, end_hour
        )));
    }
    Ok(())
}

/// Walk forward from `begin_hour:00` by random steps of `[min_interval, max_interval]` minutes.
///
/// Generation stops before appending a point whose hour is past `end_hour`, or whose
/// hour is lower than the previous point's (the walk wrapped past midnight). The result
/// therefore holds at most `num_executions` points and may hold fewer.
pub fn bounded_random_interval<R: Rng + ?Sized>(
    rng: &mut R,
    day: NaiveDate,
    num_executions: u32,
    begin_hour: u32,
    end_hour: u32,
    min_interval: u32,
    max_interval: u32,
) -> Result<TriggerSchedule, ScheduleError> {
    validate_window(begin_hour, end_hour)?;
    if min_interval == 0 || min_interval > max_interval {
        return Err(ScheduleError::InvalidConfiguration(format!(
            "interval bounds [{}, {}] must satisfy 1 <= min <= max",
            min_interval, max_interval
        )));
    }

    let mut trigger = Vec::with_capacity(num_executions as usize);
    let mut current = window_start(day, begin_hour)?;

    for _ in 0..num_executions {
        let interval_minutes = rng.gen_range(min_interval..=max_interval);
        let last = current;
        current += Duration::minutes(i64::from(interval_minutes));

        if current.hour() > end_hour || current.hour() < last.hour() {
            break;
        }
        trigger.push(current);
    }

    Ok(trigger)
}

/// Split the window into `num_executions` equal segments and pick one random minute in each.
///
/// Always yields exactly `num_executions` strictly increasing points.
pub fn even_segmented<R: Rng + ?Sized>(
    rng: &mut R,
    day: NaiveDate,
    num_executions: u32,
    begin_hour: u32,
    end_hour: u32,
) -> Result<TriggerSchedule, ScheduleError> {
    validate_window(begin_hour, end_hour)?;
    if num_executions == 0 {
        return Err(ScheduleError::InvalidConfiguration(
            "number of executions must be greater than 0".to_string(),
        ));
    }

    let total_minutes = (end_hour - begin_hour) * MINUTES_PER_HOUR;
    let segment_length = total_minutes / num_executions;
    if segment_length == 0 {
        return Err(ScheduleError::InvalidConfiguration(format!(
            "{} executions do not fit into a {} minute window",
            num_executions, total_minutes
        )));
    }

    let start = window_start(day, begin_hour)?;
    let trigger = (0..num_executions)
        .map(|segment| {
            let segment_start = segment_length * segment;
            let minute = rng.gen_range(segment_start..segment_start + segment_length);
            start + Duration::minutes(i64::from(minute))
        })
        .collect();

    Ok(trigger)
}

/// Bounded random interval schedule for today
pub fn random_scheduler(
    num_executions: u32,
    begin_hour: u32,
    end_hour: u32,
    min_interval: u32,
    max_interval: u32,
) -> Result<TriggerSchedule, ScheduleError> {
    let today = Local::now().date_naive();
    bounded_random_interval(
        &mut rand::thread_rng(),
        today,
        num_executions,
        begin_hour,
        end_hour,
        min_interval,
        max_interval,
    )
}

/// Even segmented schedule for today
pub fn random_even_scheduler(
    num_executions: u32,
    begin_hour: u32,
    end_hour: u32,
) -> Result<TriggerSchedule, ScheduleError> {
    let today = Local::now().date_naive();
    even_segmented(
        &mut rand::thread_rng(),
        today,
        num_executions,
        begin_hour,
        end_hour,
    )
}

/// Human readable time remaining until `target`, e.g. `"1d 2h 5m"`.
///
/// Returns an empty string when `target` is not in the future. Seconds are only shown
/// when nothing larger is.
pub fn time_difference(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = target - now;
    if delta <= Duration::zero() {
        return String::new();
    }

    let days = delta.num_days();
    let total_seconds = delta.num_seconds() - days * 86_400;
    let hours = total_seconds / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if parts.is_empty() && seconds > 0 {
        parts.push(format!("{}s", seconds));
    }
    parts.join(" ")
}

/// Whole minutes elapsed from `input` to `now` (negative when `input` is in the future)
pub fn diff_minutes(input: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - input).num_minutes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn test_bounded_random_interval_respects_window() {
        let mut rng = StdRng::seed_from_u64(7);
        let schedule = bounded_random_interval(&mut rng, day(), 5, 7, 23, 20, 40).unwrap();

        assert!(!schedule.is_empty());
        assert!(schedule.len() <= 5);
        assert!(schedule.windows(2).all(|w| w[0] < w[1]));
        assert!(schedule.iter().all(|t| t.hour() >= 7 && t.hour() <= 23));
    }

    #[test]
    fn test_bounded_random_interval_fixed_step() {
        let mut rng = StdRng::seed_from_u64(1);
        let schedule = bounded_random_interval(&mut rng, day(), 3, 8, 20, 30, 30).unwrap();

        let expected: Vec<NaiveDateTime> = [(8, 30), (9, 0), (9, 30)]
            .iter()
            .map(|(h, m)| day().and_hms_opt(*h, *m, 0).unwrap())
            .collect();
        assert_eq!(schedule, expected);
    }

    #[test]
    fn test_bounded_random_interval_stops_at_midnight_wrap() {
        let mut rng = StdRng::seed_from_u64(3);
        // 23:00 + 50 minute steps crosses midnight on the second step.
        let schedule = bounded_random_interval(&mut rng, day(), 10, 23, 24, 50, 50).unwrap();

        assert_eq!(schedule, vec![day().and_hms_opt(23, 50, 0).unwrap()]);
    }

    #[test]
    fn test_bounded_random_interval_stops_past_end_hour() {
        let mut rng = StdRng::seed_from_u64(3);
        let schedule = bounded_random_interval(&mut rng, day(), 10, 7, 8, 40, 40).unwrap();

        // 07:40, 08:20 are kept; 09:00 is past the end hour.
        assert_eq!(schedule.len(), 2);
    }

    #[test]
    fn test_bounded_random_interval_rejects_bad_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(bounded_random_interval(&mut rng, day(), 5, 7, 23, 40, 20).is_err());
        assert!(bounded_random_interval(&mut rng, day(), 5, 7, 23, 0, 20).is_err());
        assert!(bounded_random_interval(&mut rng, day(), 5, 23, 7, 20, 40).is_err());
    }

    #[test]
    fn test_even_segmented_one_point_per_segment() {
        let mut rng = StdRng::seed_from_u64(11);
        let schedule = even_segmented(&mut rng, day(), 4, 0, 24).unwrap();

        assert_eq!(schedule.len(), 4);
        for (segment, point) in schedule.iter().enumerate() {
            let hour = point.hour() as usize;
            assert!(hour >= segment * 6 && hour < (segment + 1) * 6);
            assert_eq!(point.date(), day());
        }
    }

    #[test]
    fn test_even_segmented_rejects_overfull_window() {
        let mut rng = StdRng::seed_from_u64(11);
        assert!(even_segmented(&mut rng, day(), 61, 7, 8).is_err());
        assert!(even_segmented(&mut rng, day(), 0, 7, 8).is_err());
    }

    #[test]
    fn test_today_helpers() {
        let schedule = random_even_scheduler(3, 7, 23).unwrap();
        assert_eq!(schedule.len(), 3);
        let schedule = random_scheduler(3, 7, 23, 20, 40).unwrap();
        assert!(schedule.len() <= 3);
    }

    #[test]
    fn test_time_difference_formats_components() {
        let now = Utc::now();
        let target = now + Duration::days(1) + Duration::hours(2) + Duration::minutes(5);
        assert_eq!(time_difference(target, now), "1d 2h 5m");
    }

    #[test]
    fn test_time_difference_seconds_only() {
        let now = Utc::now();
        assert_eq!(time_difference(now + Duration::seconds(42), now), "42s");
    }

    #[test]
    fn test_time_difference_past_is_empty() {
        let now = Utc::now();
        assert_eq!(time_difference(now - Duration::minutes(1), now), "");
        assert_eq!(time_difference(now, now), "");
    }

    #[test]
    fn test_diff_minutes() {
        let now = Utc::now();
        assert_eq!(diff_minutes(now - Duration::minutes(90), now), 90);
        assert_eq!(diff_minutes(now + Duration::minutes(30), now), -30);
        assert_eq!(diff_minutes(now - Duration::seconds(59), now), 0);
    }
}
