// Worker pool for background tasks spawned by the application
// Tracks every task so shutdown can drain them, then abort stragglers.

use crate::errors::LifecycleError;
use crate::lifecycle::Subsystem;
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

pub struct WorkerPool {
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
    drain_timeout: Duration,
}

impl WorkerPool {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
            drain_timeout,
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reap(tasks: &mut JoinSet<()>) {
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    warn!(error = %e, "Background task panicked");
                }
            }
        }
    }

    /// Spawn a tracked background task.
    ///
    /// Rejected once the pool has been shut down.
    pub fn spawn<F>(&self, name: &str, task: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // `closed` only changes under the tasks lock
        let mut tasks = self.tasks();
        if self.closed.load(Ordering::SeqCst) {
            warn!(task = name, "Worker pool is closed, rejecting task");
            return Err(LifecycleError::WorkerPoolClosed(name.to_string()));
        }
        Self::reap(&mut tasks);
        tasks.spawn(task);
        debug!(task = name, active = tasks.len(), "Spawned background task");
        Ok(())
    }

    /// Number of tasks that have not been reaped yet
    pub fn active(&self) -> usize {
        let mut tasks = self.tasks();
        Self::reap(&mut tasks);
        tasks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the pool, wait up to `drain_timeout` for tasks, then abort the rest.
    ///
    /// Returns the number of aborted tasks.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> usize {
        let mut tasks = {
            let mut tasks = self.tasks();
            self.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *tasks)
        };
        let pending = tasks.len();
        info!(pending, drain_timeout = ?self.drain_timeout, "Draining worker pool");

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_ok() {
            info!("Worker pool drained");
            return 0;
        }

        let remaining = tasks.len();
        warn!(remaining, "Worker pool drain timed out, aborting remaining tasks");
        tasks.shutdown().await;
        remaining
    }
}

#[async_trait]
impl Subsystem for WorkerPool {
    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown().await;
        Ok(())
    }
}
