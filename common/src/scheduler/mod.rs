// Scheduler module: in-process job scheduling and the job runner seam used by
// the command dispatcher

pub mod engine;

pub use engine::{JobStatus, SchedulerConfig, SchedulerEngine};

use crate::errors::ScheduleError;
use async_trait::async_trait;

/// Runs a named job right away
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, job_id: &str) -> Result<(), ScheduleError>;
}
