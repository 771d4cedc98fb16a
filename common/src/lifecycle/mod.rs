// Process lifecycle: subsystem identities, their fixed orders, and the orchestrator
// that drives startup, shutdown and hot reload.

pub mod orchestrator;
pub mod services;
pub mod signals;

pub use orchestrator::{LifecycleBuilder, LifecycleOrchestrator, ShutdownReport, SubsystemState};
pub use services::{FrontendBootstrap, ResourceCheck, ServiceHook};
pub use signals::SignalHandler;

use async_trait::async_trait;
use std::fmt;

/// A long-lived component started and stopped by the orchestrator.
///
/// Every step defaults to a no-op so components only implement what they need.
#[async_trait]
pub trait Subsystem: Send + Sync {
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reload(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubsystemId {
    Display,
    SiteAuth,
    Resources,
    Modules,
    EventBus,
    PluginSync,
    Plugins,
    Monitor,
    Scheduler,
    Commands,
    Frontend,
    AuthCheck,
    Signals,
    WorkerPool,
}

impl SubsystemId {
    pub fn name(&self) -> &'static str {
        match self {
            SubsystemId::Display => "display",
            SubsystemId::SiteAuth => "site_auth",
            SubsystemId::Resources => "resources",
            SubsystemId::Modules => "modules",
            SubsystemId::EventBus => "event_bus",
            SubsystemId::PluginSync => "plugin_sync",
            SubsystemId::Plugins => "plugins",
            SubsystemId::Monitor => "monitor",
            SubsystemId::Scheduler => "scheduler",
            SubsystemId::Commands => "commands",
            SubsystemId::Frontend => "frontend",
            SubsystemId::AuthCheck => "auth_check",
            SubsystemId::Signals => "signals",
            SubsystemId::WorkerPool => "worker_pool",
        }
    }
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Boot sequence; the first failing step aborts startup
pub const STARTUP_ORDER: [SubsystemId; 13] = [
    SubsystemId::Display,
    SubsystemId::SiteAuth,
    SubsystemId::Resources,
    SubsystemId::Modules,
    SubsystemId::EventBus,
    SubsystemId::PluginSync,
    SubsystemId::Plugins,
    SubsystemId::Monitor,
    SubsystemId::Scheduler,
    SubsystemId::Commands,
    SubsystemId::Frontend,
    SubsystemId::AuthCheck,
    SubsystemId::Signals,
];

/// Teardown sequence; not the reverse of startup
pub const SHUTDOWN_ORDER: [SubsystemId; 8] = [
    SubsystemId::Modules,
    SubsystemId::Plugins,
    SubsystemId::EventBus,
    SubsystemId::Display,
    SubsystemId::Scheduler,
    SubsystemId::Monitor,
    SubsystemId::WorkerPool,
    SubsystemId::Frontend,
];

pub const RELOAD_ORDER: [SubsystemId; 3] = [
    SubsystemId::Modules,
    SubsystemId::Scheduler,
    SubsystemId::Monitor,
];
