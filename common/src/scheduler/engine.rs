// Scheduler engine implementation
//
// Job bodies are registered in code; triggers come from configuration. A polling
// loop spawns due jobs on the worker pool, and `run_job` runs a job immediately.
// A job never runs twice at the same time, and its failures stay inside the
// scheduler.

use crate::errors::ScheduleError;
use crate::lifecycle::Subsystem;
use crate::schedule::{DailyPlan, JobTrigger};
use crate::scheduler::JobRunner;
use crate::telemetry;
use crate::worker_pool::WorkerPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often to poll for jobs due
    pub poll_interval: Duration,
    /// Timezone cron expressions and daily windows are evaluated in
    pub timezone: Tz,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timezone: Tz::UTC,
        }
    }
}

pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct JobEntry {
    name: String,
    body: JobFn,
    trigger: Option<JobTrigger>,
    next_run: Option<DateTime<Utc>>,
    plan: DailyPlan,
    running: Arc<AtomicBool>,
}

/// Scheduling state of one job, for listings
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub trigger: Option<JobTrigger>,
    pub next_run: Option<DateTime<Utc>>,
    pub running: bool,
}

/// Clears the running mark when a job run ends, including by panic
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct SchedulerState {
    config: SchedulerConfig,
    jobs: Mutex<BTreeMap<String, JobEntry>>,
    workers: Arc<WorkerPool>,
}

impl SchedulerState {
    fn jobs(&self) -> MutexGuard<'_, BTreeMap<String, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn compute_next(&self, job_id: &str, entry: &mut JobEntry, after: DateTime<Utc>) {
        entry.next_run = match &entry.trigger {
            None => None,
            Some(trigger) => match trigger.next_after(after, self.config.timezone, &mut entry.plan) {
                Ok(next) => next,
                Err(e) => {
                    error!(job_id = job_id, error = %e, "Failed to calculate next run, job unscheduled");
                    None
                }
            },
        };
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn execute(&self, job_id: &str) -> Result<(), ScheduleError> {
        let (name, body, running) = {
            let jobs = self.jobs();
            let entry = jobs
                .get(job_id)
                .ok_or_else(|| ScheduleError::JobNotFound(job_id.to_string()))?;
            (entry.name.clone(), entry.body.clone(), entry.running.clone())
        };

        if running.swap(true, Ordering::SeqCst) {
            return Err(ScheduleError::JobAlreadyRunning(job_id.to_string()));
        }
        let _guard = RunningGuard(running);

        info!(job_name = %name, "Running job");
        match AssertUnwindSafe(body()).catch_unwind().await {
            Ok(Ok(())) => {
                info!(job_name = %name, "Job completed");
                telemetry::record_job_run(job_id, "success");
            }
            Ok(Err(e)) => {
                error!(job_name = %name, error = %format!("{:#}", e), "Job failed");
                telemetry::record_job_run(job_id, "failed");
            }
            Err(_) => {
                error!(job_name = %name, "Job panicked");
                telemetry::record_job_run(job_id, "panicked");
            }
        }
        Ok(())
    }

    /// Spawn every job whose next run is at or before `now`; returns how many were spawned
    fn process_due_jobs(self: &Arc<Self>, now: DateTime<Utc>) -> usize {
        let due: Vec<String> = {
            let mut jobs = self.jobs();
            let mut due = Vec::new();
            for (id, entry) in jobs.iter_mut() {
                if !entry.next_run.is_some_and(|next| next <= now) {
                    continue;
                }
                self.compute_next(id, entry, now);
                if entry.running.load(Ordering::SeqCst) {
                    debug!(job_id = %id, "Job still running, skipping this run");
                    continue;
                }
                due.push(id.clone());
            }
            due
        };

        let mut spawned = 0;
        for job_id in due {
            let state = Arc::clone(self);
            let task_id = job_id.clone();
            let task = async move {
                if let Err(e) = state.execute(&task_id).await {
                    warn!(job_id = %task_id, error = %e, "Scheduled run skipped");
                }
            };
            match self.workers.spawn(&format!("job:{}", job_id), task) {
                Ok(()) => spawned += 1,
                Err(e) => warn!(job_id = %job_id, error = %e, "Could not spawn scheduled job"),
            }
        }
        spawned
    }
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    state: Arc<SchedulerState>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerEngine {
    pub fn new(config: SchedulerConfig, workers: Arc<WorkerPool>) -> Self {
        let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel(1);
        Self {
            state: Arc::new(SchedulerState {
                config,
                jobs: Mutex::new(BTreeMap::new()),
                workers,
            }),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    /// Register a job body; without a trigger the job only runs on request
    pub fn register<F, Fut>(&self, id: &str, name: &str, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body: JobFn = Arc::new(move || body().boxed());
        let mut jobs = self.state.jobs();
        let trigger = jobs.get(id).and_then(|entry| entry.trigger.clone());
        jobs.insert(
            id.to_string(),
            JobEntry {
                name: name.to_string(),
                body,
                trigger,
                next_run: None,
                plan: DailyPlan::default(),
                running: Arc::new(AtomicBool::new(false)),
            },
        );
        debug!(job_id = id, "Job registered");
    }

    /// Attach a trigger to a registered job; takes effect on the next `init`
    pub fn set_trigger(&self, id: &str, trigger: JobTrigger) -> Result<(), ScheduleError> {
        trigger.validate()?;
        let mut jobs = self.state.jobs();
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| ScheduleError::JobNotFound(id.to_string()))?;
        entry.trigger = Some(trigger);
        Ok(())
    }

    /// Recalculate next run times from now, drawing fresh daily plans.
    ///
    /// Returns the number of jobs with a next run.
    #[instrument(skip(self))]
    pub fn init(&self) -> usize {
        let now = Utc::now();
        let mut jobs = self.state.jobs();
        for (id, entry) in jobs.iter_mut() {
            entry.plan = DailyPlan::default();
            self.state.compute_next(id, entry, now);
        }
        let scheduled = jobs.values().filter(|entry| entry.next_run.is_some()).count();
        info!(jobs = jobs.len(), scheduled, "Scheduler initialized");
        scheduled
    }

    pub fn jobs(&self) -> Vec<JobStatus> {
        self.state
            .jobs()
            .iter()
            .map(|(id, entry)| JobStatus {
                id: id.clone(),
                name: entry.name.clone(),
                trigger: entry.trigger.clone(),
                next_run: entry.next_run,
                running: entry.running.load(Ordering::SeqCst),
            })
            .collect()
    }

    /// Run jobs due at `now`; the polling loop calls this on every tick
    pub fn process_due_jobs(&self, now: DateTime<Utc>) -> usize {
        self.state.process_due_jobs(now)
    }

    /// Initialize run times and start the polling loop
    #[instrument(skip(self))]
    pub fn start(&self) {
        let mut handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            debug!("Scheduler loop already running");
            return;
        }
        self.init();

        let state = Arc::clone(&self.state);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let poll_interval = state.config.poll_interval;
        info!(poll_interval = ?poll_interval, "Starting scheduler engine");

        *handle = Some(tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let count = state.process_due_jobs(Utc::now());
                        if count > 0 {
                            info!(jobs_spawned = count, "Spawned due jobs");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown signal received, stopping scheduler");
                        break;
                    }
                }
            }
        }));
    }

    /// Stop the polling loop; running jobs are left to the worker pool
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            debug!("Scheduler loop is not running");
            return;
        };

        let _ = self.shutdown_tx.send(());
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler loop task failed");
        }
        info!("Scheduler engine stopped");
    }
}

#[async_trait]
impl JobRunner for SchedulerEngine {
    async fn run_job(&self, job_id: &str) -> Result<(), ScheduleError> {
        self.state.execute(job_id).await
    }
}

#[async_trait]
impl Subsystem for SchedulerEngine {
    async fn start(&self) -> anyhow::Result<()> {
        SchedulerEngine::start(self);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        SchedulerEngine::stop(self).await;
        Ok(())
    }

    async fn reload(&self) -> anyhow::Result<()> {
        self.init();
        Ok(())
    }
}
