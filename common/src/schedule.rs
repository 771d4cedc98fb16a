// Job trigger parsing and next execution time calculation
//
// Three trigger kinds are supported: cron expressions evaluated in the scheduler's
// timezone, fixed intervals, and random daily windows whose run times are drawn
// fresh every day by the trigger time generator.

use crate::errors::ScheduleError;
use crate::trigger;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How run times are spread across a random daily window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Spacing {
    /// One random time per equal segment of the window
    #[default]
    Even,
    /// Random steps of `[min, max]` minutes from the start of the window
    Bounded {
        min_interval_minutes: u32,
        max_interval_minutes: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobTrigger {
    Cron {
        expression: String,
    },
    Interval {
        seconds: u64,
    },
    RandomDaily {
        executions: u32,
        begin_hour: u32,
        end_hour: u32,
        #[serde(default)]
        spacing: Spacing,
    },
}

/// Run times drawn for one day of a random daily trigger
#[derive(Debug, Clone, Default)]
pub struct DailyPlan {
    date: Option<NaiveDate>,
    points: Vec<DateTime<Utc>>,
}

impl DailyPlan {
    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn points(&self) -> &[DateTime<Utc>] {
        &self.points
    }
}

/// Look this far ahead for a day whose random plan still has a future run
const MAX_PLAN_DAYS: i64 = 7;

impl JobTrigger {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            JobTrigger::Cron { expression } => parse_cron_expression(expression).map(|_| ()),
            JobTrigger::Interval { seconds } => {
                if *seconds == 0 {
                    return Err(ScheduleError::InvalidConfiguration(
                        "interval must be at least one second".to_string(),
                    ));
                }
                Ok(())
            }
            JobTrigger::RandomDaily { .. } => {
                // Drawing a throwaway plan runs every window and spacing check
                let today = Utc::now().date_naive();
                self.plan_for(today).map(|_| ())
            }
        }
    }

    fn plan_for(&self, day: NaiveDate) -> Result<Vec<NaiveDateTime>, ScheduleError> {
        let JobTrigger::RandomDaily {
            executions,
            begin_hour,
            end_hour,
            spacing,
        } = self
        else {
            return Ok(Vec::new());
        };

        let mut rng = rand::thread_rng();
        match spacing {
            Spacing::Even => {
                trigger::even_segmented(&mut rng, day, *executions, *begin_hour, *end_hour)
            }
            Spacing::Bounded {
                min_interval_minutes,
                max_interval_minutes,
            } => trigger::bounded_random_interval(
                &mut rng,
                day,
                *executions,
                *begin_hour,
                *end_hour,
                *min_interval_minutes,
                *max_interval_minutes,
            ),
        }
    }

    /// First run time strictly after `after`.
    ///
    /// Random daily triggers keep their drawn plan in `plan` and draw a new one when
    /// the day changes.
    pub fn next_after(
        &self,
        after: DateTime<Utc>,
        timezone: Tz,
        plan: &mut DailyPlan,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match self {
            JobTrigger::Cron { expression } => {
                let schedule = parse_cron_expression(expression)?;
                let reference = after.with_timezone(&timezone);
                Ok(schedule
                    .after(&reference)
                    .next()
                    .map(|next| next.with_timezone(&Utc)))
            }
            JobTrigger::Interval { seconds } => {
                let seconds = i64::try_from(*seconds).map_err(|_| {
                    ScheduleError::CalculationFailed(format!("interval {} is too large", seconds))
                })?;
                Ok(after.checked_add_signed(Duration::seconds(seconds)))
            }
            JobTrigger::RandomDaily { .. } => {
                let today = after.with_timezone(&timezone).date_naive();
                for offset in 0..MAX_PLAN_DAYS {
                    let day = today + Duration::days(offset);
                    if plan.date != Some(day) {
                        plan.points = self
                            .plan_for(day)?
                            .into_iter()
                            .filter_map(|local| timezone.from_local_datetime(&local).earliest())
                            .map(|at| at.with_timezone(&Utc))
                            .collect();
                        plan.date = Some(day);
                    }
                    if let Some(next) = plan.points.iter().find(|at| **at > after) {
                        return Ok(Some(*next));
                    }
                }
                Ok(None)
            }
        }
    }
}

/// Parse and validate a cron expression (seconds field first)
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expression).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}
