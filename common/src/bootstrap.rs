// Application assembly
//
// Builds every service from the settings and wires them into the lifecycle
// orchestrator. Binaries and integration tests share this instead of repeating
// the wiring.

use crate::auth::{AuthCheck, StaticSiteAuth};
use crate::command::{BuiltinCommands, CommandDispatcher, CommandRegistry, CommandSubsystem};
use crate::config::Settings;
use crate::events::{EventBus, EventType};
use crate::feeds;
use crate::lifecycle::{
    FrontendBootstrap, LifecycleOrchestrator, ResourceCheck, ServiceHook, SignalHandler,
    SubsystemId,
};
use crate::messages::{MessageQueue, Role};
use crate::models::{CommandOrigin, ExecutionEvent};
use crate::modules::{LogStorageModule, Module, ModuleManager};
use crate::notify::{BusNotifier, LogNotifier, NotificationSink};
use crate::plugins::{PluginManager, PluginSync};
use crate::progress::ProgressTracker;
use crate::schedule::parse_timezone;
use crate::scheduler::{JobRunner, SchedulerConfig, SchedulerEngine};
use crate::stop::StopFlag;
use crate::worker_pool::WorkerPool;
use anyhow::{Context, Result};
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

pub const PLUGIN_SYNC_JOB: &str = "plugin_sync";
pub const MODULE_CHECK_JOB: &str = "module_check";

/// Every long-lived service of the process
pub struct AppContext {
    pub settings: Settings,
    pub stop: StopFlag,
    pub workers: Arc<WorkerPool>,
    pub bus: Arc<EventBus>,
    pub messages: Arc<MessageQueue>,
    pub progress: Arc<ProgressTracker>,
    pub registry: Arc<CommandRegistry>,
    pub scheduler: Arc<SchedulerEngine>,
    pub notifier: Arc<dyn NotificationSink>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub plugins: Arc<PluginManager>,
    pub modules: Arc<ModuleManager>,
    pub orchestrator: Arc<LifecycleOrchestrator>,
}

impl AppContext {
    /// Wire the services; nothing is started until `startup`
    #[instrument(skip_all, fields(app = %settings.app.name))]
    pub fn build(settings: Settings) -> Result<Self> {
        Self::build_with_modules(settings, Vec::new())
    }

    /// Like `build`, with extra functional modules next to the built-in ones
    pub fn build_with_modules(settings: Settings, extra: Vec<Arc<dyn Module>>) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

        let stop = StopFlag::new();
        let workers = Arc::new(WorkerPool::new(settings.worker_drain_timeout()));
        let bus = Arc::new(EventBus::new(settings.event_bus.capacity, workers.clone()));
        let messages = Arc::new(MessageQueue::default());
        let progress = Arc::new(ProgressTracker::new());
        let registry = Arc::new(CommandRegistry::new());

        let notifier: Arc<dyn NotificationSink> = if settings.app.dev || settings.app.console {
            Arc::new(LogNotifier)
        } else {
            Arc::new(BusNotifier::new(bus.clone()))
        };

        let timezone = parse_timezone(&settings.scheduler.timezone)?;
        let scheduler = Arc::new(SchedulerEngine::new(
            SchedulerConfig {
                poll_interval: Duration::from_secs(settings.scheduler.poll_interval_seconds),
                timezone,
            },
            workers.clone(),
        ));
        let jobs: Arc<dyn JobRunner> = scheduler.clone();

        let plugins = Arc::new(PluginManager::new(
            settings.plugins.manifest_dir.clone(),
            settings.plugin_watch_interval(),
            bus.clone(),
        ));

        let mut available: Vec<Arc<dyn Module>> =
            vec![Arc::new(LogStorageModule::new(settings.feeds.log_dir.clone()))];
        available.extend(extra);
        let modules = Arc::new(ModuleManager::new(available));

        register_builtin_jobs(&scheduler, &plugins, &modules, &messages);
        for job in &settings.scheduler.jobs {
            scheduler
                .set_trigger(&job.id, job.trigger.clone())
                .with_context(|| format!("Failed to schedule job '{}'", job.id))?;
        }

        let dispatcher = Arc::new(CommandDispatcher::new(
            registry.clone(),
            jobs.clone(),
            notifier.clone(),
            messages.clone(),
        ));
        let builtins = Arc::new(BuiltinCommands::new(
            settings.app.version.clone(),
            stop.clone(),
            notifier.clone(),
            jobs,
            messages.clone(),
            &registry,
            settings.commands.jobs.clone(),
        ));
        let commands = Arc::new(CommandSubsystem::new(
            dispatcher.clone(),
            builtins,
            plugins.clone(),
            bus.clone(),
            !settings.app.dev,
        ));

        let auth_check = Arc::new(AuthCheck::new(
            Arc::new(StaticSiteAuth::new(settings.site_auth.auth_level)),
            messages.clone(),
            notifier.clone(),
            settings.site_auth.link.clone(),
        ));

        let orchestrator = LifecycleOrchestrator::builder()
            .stop_timeout(settings.stop_timeout())
            .register(SubsystemId::Display, Arc::new(ServiceHook::new("display")))
            .register(
                SubsystemId::SiteAuth,
                Arc::new(StaticSiteAuth::new(settings.site_auth.auth_level)),
            )
            .register(
                SubsystemId::Resources,
                Arc::new(ResourceCheck::new(vec![
                    settings.feeds.log_dir.clone(),
                    settings.plugins.manifest_dir.clone(),
                ])),
            )
            .register(SubsystemId::Modules, modules.clone())
            .register(SubsystemId::EventBus, bus.clone())
            .register(SubsystemId::PluginSync, Arc::new(PluginSync(plugins.clone())))
            .register(SubsystemId::Plugins, plugins.clone())
            .register(SubsystemId::Monitor, Arc::new(ServiceHook::new("monitor")))
            .register(SubsystemId::Scheduler, scheduler.clone())
            .register(SubsystemId::Commands, commands)
            .register(SubsystemId::Frontend, Arc::new(FrontendBootstrap))
            .register(SubsystemId::AuthCheck, auth_check)
            .register(SubsystemId::Signals, Arc::new(SignalHandler::new(stop.clone())))
            .register(SubsystemId::WorkerPool, workers.clone())
            .build()?;
        let orchestrator = Arc::new(orchestrator);
        subscribe_reload(&bus, &orchestrator);

        info!("Application context assembled");
        Ok(Self {
            settings,
            stop,
            workers,
            bus,
            messages,
            progress,
            registry,
            scheduler,
            notifier,
            dispatcher,
            plugins,
            modules,
            orchestrator,
        })
    }

    pub async fn startup(&self) -> Result<()> {
        self.orchestrator.startup().await?;
        Ok(())
    }

    pub async fn reload(&self) -> Result<()> {
        self.orchestrator.reload().await?;
        Ok(())
    }

    /// Publish a command line for asynchronous dispatch
    pub fn submit(&self, line: &str, origin: &CommandOrigin) -> Result<()> {
        let event = ExecutionEvent::from_origin(line, origin);
        let payload = serde_json::to_value(&event).context("Failed to encode command event")?;
        self.bus.publish(EventType::CommandExecute, payload);
        Ok(())
    }

    pub fn progress_feed(&self, key: &str) -> impl Stream<Item = String> {
        feeds::progress_feed(
            self.progress.clone(),
            key.to_string(),
            self.stop.clone(),
            Duration::from_millis(self.settings.feeds.progress_interval_ms),
        )
    }

    pub fn message_feed(&self, role: Role) -> impl Stream<Item = String> {
        feeds::message_feed(
            self.messages.clone(),
            role,
            self.stop.clone(),
            Duration::from_millis(self.settings.feeds.message_interval_ms),
        )
    }

    /// Log feed with the configured tail length unless `length` asks for more
    pub fn log_feed(&self, length: Option<usize>) -> impl Stream<Item = String> {
        feeds::log_feed(
            self.settings.feeds.log_path(),
            length.unwrap_or(self.settings.feeds.tail_length),
            self.stop.clone(),
            Duration::from_millis(self.settings.feeds.log_interval_ms),
        )
    }
}

/// `system.reload` runs the reload sequence; the handler holds the orchestrator weakly
fn subscribe_reload(bus: &EventBus, orchestrator: &Arc<LifecycleOrchestrator>) {
    let orchestrator = Arc::downgrade(orchestrator);
    bus.subscribe(EventType::SystemReload, move |_| {
        let orchestrator = orchestrator.clone();
        async move {
            let Some(orchestrator) = orchestrator.upgrade() else {
                return;
            };
            match orchestrator.reload().await {
                Ok(()) => info!("Hot reload finished"),
                Err(e) => error!(error = %format!("{:#}", e), "Hot reload failed"),
            }
        }
    });
}

fn register_builtin_jobs(
    scheduler: &SchedulerEngine,
    plugins: &Arc<PluginManager>,
    modules: &Arc<ModuleManager>,
    messages: &Arc<MessageQueue>,
) {
    let plugins = plugins.clone();
    scheduler.register(PLUGIN_SYNC_JOB, "Plugin sync", move || {
        let plugins = plugins.clone();
        async move {
            plugins.request_reload("scheduled sync");
            Ok(())
        }
    });

    let modules = modules.clone();
    let messages = messages.clone();
    scheduler.register(MODULE_CHECK_JOB, "Module check", move || {
        let modules = modules.clone();
        let messages = messages.clone();
        async move {
            for (id, available, message) in modules.test_all().await {
                if !available {
                    warn!(module = %id, reason = %message, "Module unavailable");
                    messages.put(format!("Module {} unavailable", id), message, Role::System);
                }
            }
            Ok(())
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::schedule::JobTrigger;
    use tempfile::TempDir;

    fn settings(root: &TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.app.dev = true;
        settings.feeds.log_dir = root.path().join("logs");
        settings.plugins.manifest_dir = root.path().join("plugins");
        settings.lifecycle.worker_drain_seconds = 1;
        settings
    }

    #[tokio::test]
    async fn test_build_registers_builtin_jobs() {
        let root = TempDir::new().unwrap();
        let context = AppContext::build(settings(&root)).unwrap();

        let ids: Vec<_> = context.scheduler.jobs().into_iter().map(|job| job.id).collect();
        assert!(ids.contains(&PLUGIN_SYNC_JOB.to_string()));
        assert!(ids.contains(&MODULE_CHECK_JOB.to_string()));
        assert!(context.registry.is_empty());
    }

    #[tokio::test]
    async fn test_trigger_for_unknown_job_is_rejected() {
        let root = TempDir::new().unwrap();
        let mut settings = settings(&root);
        settings.scheduler.jobs.push(JobConfig {
            id: "missing".to_string(),
            trigger: JobTrigger::Interval { seconds: 60 },
        });
        assert!(AppContext::build(settings).is_err());
    }

    #[tokio::test]
    async fn test_invalid_settings_are_rejected() {
        let root = TempDir::new().unwrap();
        let mut settings = settings(&root);
        settings.event_bus.capacity = 0;
        assert!(AppContext::build(settings).is_err());
    }

    #[tokio::test]
    async fn test_startup_and_shutdown() {
        let root = TempDir::new().unwrap();
        let context = AppContext::build(settings(&root)).unwrap();

        context.startup().await.unwrap();
        assert!(root.path().join("logs").is_dir());
        assert!(context.registry.get("/help").is_some());
        assert!(context.bus.is_running());

        let report = context.orchestrator.shutdown().await;
        assert!(report.is_clean(), "{:?}", report);
        assert!(!context.bus.is_running());
        assert!(context.workers.is_closed());
    }
}
