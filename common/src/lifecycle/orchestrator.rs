// Lifecycle orchestrator
//
// Startup walks the startup order and stops at the first failure. Shutdown walks
// its own order one step at a time; a failing or hanging step is logged and
// skipped. Steps that stopped cleanly are not stopped again, so shutdown can be
// called more than once and picks up where it left off.

use crate::errors::LifecycleError;
use crate::lifecycle::{Subsystem, SubsystemId, RELOAD_ORDER, SHUTDOWN_ORDER, STARTUP_ORDER};
use crate::stop::StopFlag;
use crate::telemetry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemState {
    Idle,
    Running,
    StartFailed,
    Stopped,
    StopFailed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: Vec<SubsystemId>,
    pub failed: Vec<SubsystemId>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct LifecycleBuilder {
    subsystems: HashMap<SubsystemId, Arc<dyn Subsystem>>,
    startup_order: Vec<SubsystemId>,
    shutdown_order: Vec<SubsystemId>,
    reload_order: Vec<SubsystemId>,
    stop_timeout: Duration,
}

impl Default for LifecycleBuilder {
    fn default() -> Self {
        Self {
            subsystems: HashMap::new(),
            startup_order: STARTUP_ORDER.to_vec(),
            shutdown_order: SHUTDOWN_ORDER.to_vec(),
            reload_order: RELOAD_ORDER.to_vec(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl LifecycleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, id: SubsystemId, subsystem: Arc<dyn Subsystem>) -> Self {
        self.subsystems.insert(id, subsystem);
        self
    }

    pub fn startup_order(mut self, order: impl Into<Vec<SubsystemId>>) -> Self {
        self.startup_order = order.into();
        self
    }

    pub fn shutdown_order(mut self, order: impl Into<Vec<SubsystemId>>) -> Self {
        self.shutdown_order = order.into();
        self
    }

    pub fn reload_order(mut self, order: impl Into<Vec<SubsystemId>>) -> Self {
        self.reload_order = order.into();
        self
    }

    /// Upper bound for a single stop step
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Every id named in an order must have been registered
    pub fn build(self) -> Result<LifecycleOrchestrator, LifecycleError> {
        for id in self
            .startup_order
            .iter()
            .chain(&self.shutdown_order)
            .chain(&self.reload_order)
        {
            if !self.subsystems.contains_key(id) {
                return Err(LifecycleError::UnknownSubsystem(*id));
            }
        }

        let states = self
            .subsystems
            .keys()
            .map(|id| (*id, SubsystemState::Idle))
            .collect();

        Ok(LifecycleOrchestrator {
            subsystems: self.subsystems,
            startup_order: self.startup_order,
            shutdown_order: self.shutdown_order,
            reload_order: self.reload_order,
            stop_timeout: self.stop_timeout,
            states: Mutex::new(states),
            shutdown_lock: tokio::sync::Mutex::new(()),
        })
    }
}

pub struct LifecycleOrchestrator {
    subsystems: HashMap<SubsystemId, Arc<dyn Subsystem>>,
    startup_order: Vec<SubsystemId>,
    shutdown_order: Vec<SubsystemId>,
    reload_order: Vec<SubsystemId>,
    stop_timeout: Duration,
    states: Mutex<HashMap<SubsystemId, SubsystemState>>,
    shutdown_lock: tokio::sync::Mutex<()>,
}

impl LifecycleOrchestrator {
    pub fn builder() -> LifecycleBuilder {
        LifecycleBuilder::new()
    }

    fn states(&self) -> MutexGuard<'_, HashMap<SubsystemId, SubsystemState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, id: SubsystemId, state: SubsystemState) {
        self.states().insert(id, state);
    }

    pub fn state(&self, id: SubsystemId) -> Option<SubsystemState> {
        self.states().get(&id).copied()
    }

    fn subsystem(&self, id: SubsystemId) -> Result<&Arc<dyn Subsystem>, LifecycleError> {
        self.subsystems
            .get(&id)
            .ok_or(LifecycleError::UnknownSubsystem(id))
    }

    /// Start every subsystem in startup order, aborting at the first failure
    #[instrument(skip(self))]
    pub async fn startup(&self) -> Result<(), LifecycleError> {
        info!(steps = self.startup_order.len(), "Starting subsystems");
        for &id in &self.startup_order {
            let subsystem = self.subsystem(id)?;
            info!(subsystem = %id, "Starting subsystem");
            if let Err(source) = subsystem.start().await {
                error!(subsystem = %id, error = %format!("{:#}", source), "Subsystem failed to start");
                self.set_state(id, SubsystemState::StartFailed);
                return Err(LifecycleError::StartupFailed {
                    subsystem: id,
                    source,
                });
            }
            self.set_state(id, SubsystemState::Running);
        }
        info!("All subsystems started");
        Ok(())
    }

    /// Stop subsystems in shutdown order.
    ///
    /// Never fails: a step that errors or exceeds the stop timeout is logged, counted,
    /// and skipped. Concurrent calls run one after the other.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> ShutdownReport {
        let _guard = self.shutdown_lock.lock().await;
        let mut report = ShutdownReport::default();

        for &id in &self.shutdown_order {
            if self.state(id) == Some(SubsystemState::Stopped) {
                continue;
            }
            let Ok(subsystem) = self.subsystem(id) else {
                continue;
            };

            info!(subsystem = %id, "Stopping subsystem");
            let outcome = tokio::time::timeout(self.stop_timeout, subsystem.stop()).await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{:#}", e)),
                Err(_) => Some(format!("timed out after {:?}", self.stop_timeout)),
            };

            match failure {
                None => {
                    self.set_state(id, SubsystemState::Stopped);
                    report.stopped.push(id);
                }
                Some(reason) => {
                    warn!(subsystem = %id, error = %reason, "Subsystem failed to stop, continuing");
                    telemetry::record_stop_failure(id.name());
                    self.set_state(id, SubsystemState::StopFailed);
                    report.failed.push(id);
                }
            }
        }

        info!(
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            "Shutdown sequence finished"
        );
        report
    }

    /// Reload subsystems in reload order, aborting at the first failure
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<(), LifecycleError> {
        for &id in &self.reload_order {
            let subsystem = self.subsystem(id)?;
            info!(subsystem = %id, "Reloading subsystem");
            subsystem
                .reload()
                .await
                .map_err(|source| LifecycleError::ReloadFailed {
                    subsystem: id,
                    source,
                })?;
        }
        info!("Reload finished");
        Ok(())
    }

    /// Wait for a stop request, then run the shutdown sequence
    pub async fn run_until_stopped(&self, stop: &StopFlag) -> ShutdownReport {
        stop.stopped().await;
        info!("Stop requested, shutting down");
        self.shutdown().await
    }
}
