// Error handling framework
// One enum per concern; handler bodies and subsystem steps use anyhow.

use crate::command::CallShape;
use crate::lifecycle::SubsystemId;
use thiserror::Error;

/// Command registration errors
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Invalid command key '{0}': keys must be non-empty and contain no whitespace")]
    InvalidKey(String),

    #[error("Unsupported handler arity {arity} without static data")]
    UnsupportedArity { arity: usize },

    #[error("Handler for '{key}' is declared as {declared} but binds as {expected}")]
    ShapeMismatch {
        key: String,
        declared: CallShape,
        expected: CallShape,
    },

    #[error("Invalid static data for '{key}': {reason}")]
    InvalidStaticData { key: String, reason: String },
}

/// Schedule-related errors (trigger generation and the job scheduler)
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid schedule configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Schedule calculation failed: {0}")]
    CalculationFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job is already running: {0}")]
    JobAlreadyRunning(String),
}

/// Event bus errors
#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Event bus consumer is already running")]
    AlreadyRunning,

    #[error("Invalid event payload for {event_type}: {reason}")]
    InvalidPayload { event_type: String, reason: String },
}

/// Plugin manager errors
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Failed to read plugin manifest {path}: {reason}")]
    ManifestRead { path: String, reason: String },

    #[error("Failed to parse plugin manifest {path}: {reason}")]
    ManifestParse { path: String, reason: String },

    #[error("Duplicate plugin id: {0}")]
    DuplicateId(String),
}

/// Module manager errors
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Module {id} failed to initialize: {reason}")]
    InitFailed { id: String, reason: String },
}

/// Lifecycle orchestration errors
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Subsystem {0} is referenced in an order but was never registered")]
    UnknownSubsystem(SubsystemId),

    #[error("Subsystem {subsystem} failed to start: {source}")]
    StartupFailed {
        subsystem: SubsystemId,
        #[source]
        source: anyhow::Error,
    },

    #[error("Subsystem {subsystem} failed to reload: {source}")]
    ReloadFailed {
        subsystem: SubsystemId,
        #[source]
        source: anyhow::Error,
    },

    #[error("Worker pool is shut down; task '{0}' was rejected")]
    WorkerPoolClosed(String),
}
