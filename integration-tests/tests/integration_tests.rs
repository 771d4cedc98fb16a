// Integration tests for the command daemon
// These tests boot the full application context and verify end-to-end workflows:
// dispatch through the event bus, plugin relays, scheduler-backed commands and
// the stop flag driving shutdown.

use async_trait::async_trait;
use common::bootstrap::AppContext;
use common::config::{JobCommandConfig, Settings};
use common::events::{Event, EventType};
use common::lifecycle::{SubsystemId, SHUTDOWN_ORDER};
use common::messages::Role;
use common::models::{CommandOrigin, MessageChannel};
use common::modules::Module;
use common::schedule::JobTrigger;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Settings pointing every directory into a temporary root
fn test_settings(root: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.app.version = "4.2.0".to_string();
    settings.feeds.log_dir = root.path().join("logs");
    settings.plugins.manifest_dir = root.path().join("plugins");
    settings.lifecycle.stop_timeout_seconds = 2;
    settings.lifecycle.worker_drain_seconds = 1;
    settings.commands.jobs = vec![
        JobCommandConfig {
            key: "/sync_plugins".to_string(),
            job_id: "plugin_sync".to_string(),
            description: "Reload plugin manifests".to_string(),
            category: Some("Plugins".to_string()),
        },
        JobCommandConfig {
            key: "/check_modules".to_string(),
            job_id: "module_check".to_string(),
            description: "Test every loaded module".to_string(),
            category: None,
        },
    ];
    settings
}

fn write_manifest(root: &TempDir, file: &str, manifest: serde_json::Value) {
    let dir = root.path().join("plugins");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file), manifest.to_string()).unwrap();
}

/// Forward every event of `event_type` into a channel
fn collect(context: &AppContext, event_type: EventType) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    context.bus.subscribe(event_type, move |event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event);
        }
    });
    rx
}

/// Wait for the first event matching `predicate`
async fn wait_for_event(
    rx: &mut mpsc::UnboundedReceiver<Event>,
    timeout_secs: u64,
    predicate: impl Fn(&Event) -> bool,
) -> Result<Event, String> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) if predicate(&event) => return Ok(event),
            Ok(Some(_)) => continue,
            Ok(None) => return Err("Event channel closed".to_string()),
            Err(_) => return Err(format!("Timeout after {}s waiting for event", timeout_secs)),
        }
    }
}

/// Poll `condition` every 20ms until it holds
async fn wait_until(timeout_secs: u64, condition: impl Fn() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(timeout_secs) {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    condition()
}

fn web_user() -> CommandOrigin {
    CommandOrigin::user(MessageChannel::Web, "dashboard", "alice")
}

struct UnavailableModule;

#[async_trait]
impl Module for UnavailableModule {
    fn id(&self) -> &str {
        "remote_storage"
    }

    fn name(&self) -> &str {
        "Remote storage"
    }

    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn test(&self) -> (bool, String) {
        (false, "endpoint unreachable".to_string())
    }
}

/// Counts how often it was initialized
struct CountingModule {
    inits: Arc<AtomicUsize>,
}

#[async_trait]
impl Module for CountingModule {
    fn id(&self) -> &str {
        "counting"
    }

    fn name(&self) -> &str {
        "Counting"
    }

    async fn init(&self) -> anyhow::Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn test(&self) -> (bool, String) {
        (true, String::new())
    }
}

fn next_run(context: &AppContext, job_id: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    context
        .scheduler
        .jobs()
        .into_iter()
        .find(|job| job.id == job_id)
        .and_then(|job| job.next_run)
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_boot_broadcasts_menu_and_answers_commands() {
        let root = TempDir::new().unwrap();
        let context = AppContext::build(test_settings(&root)).unwrap();
        let mut menus = collect(&context, EventType::CommandRegister);
        let mut notices = collect(&context, EventType::NoticeMessage);

        context.startup().await.unwrap();

        let menu = wait_for_event(&mut menus, 5, |_| true).await.unwrap();
        let keys: Vec<String> = menu.data["commands"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["cmd"].as_str().unwrap().to_string())
            .collect();
        assert!(keys.contains(&"/version".to_string()));
        assert!(keys.contains(&"/sync_plugins".to_string()));

        context.submit("/version", &web_user()).unwrap();
        let notice = wait_for_event(&mut notices, 5, |event| {
            event.data["title"] == json!("Current version: 4.2.0")
        })
        .await
        .unwrap();
        assert_eq!(notice.data["userid"], json!("alice"));
        assert_eq!(notice.data["channel"], json!("web"));

        let report = context.orchestrator.shutdown().await;
        assert!(report.is_clean(), "{:?}", report);
    }

    #[tokio::test]
    async fn test_plugin_command_relays_event_with_call_context() {
        let root = TempDir::new().unwrap();
        write_manifest(
            &root,
            "weather.json",
            json!({
                "id": "weather",
                "name": "Weather",
                "version": "1.0.0",
                "commands": [{
                    "cmd": "/forecast",
                    "desc": "Show the forecast",
                    "event": "plugin.action",
                    "data": { "action": "forecast" }
                }]
            }),
        );

        let context = AppContext::build(test_settings(&root)).unwrap();
        let mut actions = collect(&context, EventType::PluginAction);
        context.startup().await.unwrap();

        let command = context.registry.get("/forecast").unwrap();
        assert_eq!(command.category.as_deref(), Some("weather"));

        context.submit("/forecast hanoi tomorrow", &web_user()).unwrap();
        let action = wait_for_event(&mut actions, 5, |_| true).await.unwrap();
        assert_eq!(action.data["action"], json!("forecast"));
        assert_eq!(action.data["arg_str"], json!("hanoi tomorrow"));
        assert_eq!(action.data["user"], json!("alice"));
        assert_eq!(action.data["source"], json!("dashboard"));

        context.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_scheduled_sync_picks_up_new_plugins() {
        let root = TempDir::new().unwrap();
        let context = AppContext::build(test_settings(&root)).unwrap();
        context.startup().await.unwrap();
        assert!(context.registry.get("/lights").is_none());

        write_manifest(
            &root,
            "home.json",
            json!({
                "id": "home",
                "name": "Home",
                "commands": [{ "cmd": "/lights", "desc": "Toggle lights", "event": "plugin.action" }]
            }),
        );
        context.submit("/sync_plugins", &web_user()).unwrap();

        let registry = context.registry.clone();
        assert!(wait_until(5, || registry.get("/lights").is_some()).await);
        let plugins = context.plugins.list();
        assert_eq!(plugins, vec![("home".to_string(), "Home".to_string(), true)]);

        context.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_module_check_reports_unavailable_modules() {
        let root = TempDir::new().unwrap();
        let context = AppContext::build_with_modules(
            test_settings(&root),
            vec![Arc::new(UnavailableModule) as Arc<dyn Module>],
        )
        .unwrap();
        context.startup().await.unwrap();

        context.submit("/check_modules", &web_user()).unwrap();
        let messages = context.messages.clone();
        assert!(wait_until(5, || !messages.is_empty(Role::System)).await);

        let message = context.messages.get(Role::System).unwrap();
        assert_eq!(message.title, "Module remote_storage unavailable");
        assert_eq!(message.text, "endpoint unreachable");

        context.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_command_is_recorded_not_propagated() {
        let root = TempDir::new().unwrap();
        let context = AppContext::build(test_settings(&root)).unwrap();
        context.startup().await.unwrap();

        // Unknown job behind a valid command key
        context
            .registry
            .register_job("/broken", "Broken job", "does_not_exist")
            .unwrap();
        context.submit("/broken", &web_user()).unwrap();

        let messages = context.messages.clone();
        assert!(wait_until(5, || !messages.is_empty(Role::System)).await);
        let message = context.messages.get(Role::System).unwrap();
        assert_eq!(message.title, "Command /broken failed");

        // The dispatcher keeps serving commands afterwards
        let mut notices = collect(&context, EventType::NoticeMessage);
        context.submit("/version", &web_user()).unwrap();
        assert!(wait_for_event(&mut notices, 5, |_| true).await.is_ok());

        context.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_command_drives_shutdown() {
        let root = TempDir::new().unwrap();
        let context = Arc::new(AppContext::build(test_settings(&root)).unwrap());
        context.startup().await.unwrap();

        let runner = {
            let context = context.clone();
            tokio::spawn(async move { context.orchestrator.run_until_stopped(&context.stop).await })
        };

        context.submit("/restart", &web_user()).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(10), runner)
            .await
            .expect("shutdown did not finish in time")
            .unwrap();

        assert!(context.stop.is_stopped());
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(report.stopped, SHUTDOWN_ORDER.to_vec());
        assert!(!context.bus.is_running());
        assert!(context.workers.is_closed());
    }

    #[tokio::test]
    async fn test_second_shutdown_has_nothing_left_to_stop() {
        let root = TempDir::new().unwrap();
        let context = AppContext::build(test_settings(&root)).unwrap();
        context.startup().await.unwrap();

        let first = context.orchestrator.shutdown().await;
        assert!(first.is_clean());
        assert!(first.stopped.contains(&SubsystemId::Scheduler));

        let second = context.orchestrator.shutdown().await;
        assert!(second.stopped.is_empty());
        assert!(second.failed.is_empty());
    }

    #[tokio::test]
    async fn test_reload_reinitializes_modules_and_scheduler() {
        let root = TempDir::new().unwrap();
        let inits = Arc::new(AtomicUsize::new(0));
        let context = AppContext::build_with_modules(
            test_settings(&root),
            vec![Arc::new(CountingModule {
                inits: inits.clone(),
            }) as Arc<dyn Module>],
        )
        .unwrap();
        context.startup().await.unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(next_run(&context, "plugin_sync"), None);

        // A trigger attached after startup only takes effect on reload
        context
            .scheduler
            .set_trigger("plugin_sync", JobTrigger::Interval { seconds: 3600 })
            .unwrap();
        assert_eq!(next_run(&context, "plugin_sync"), None);

        let before = chrono::Utc::now();
        context.reload().await.unwrap();

        assert_eq!(inits.load(Ordering::SeqCst), 2);
        let modules = context.modules.list().await;
        assert!(modules.contains(&("counting".to_string(), "Counting".to_string())));
        let next = next_run(&context, "plugin_sync").unwrap();
        assert!(next > before + chrono::Duration::minutes(59));
        assert!(next <= chrono::Utc::now() + chrono::Duration::hours(1));

        let report = context.orchestrator.shutdown().await;
        assert!(report.is_clean(), "{:?}", report);
    }

    #[tokio::test]
    async fn test_reload_event_runs_reload_sequence() {
        let root = TempDir::new().unwrap();
        let inits = Arc::new(AtomicUsize::new(0));
        let context = AppContext::build_with_modules(
            test_settings(&root),
            vec![Arc::new(CountingModule {
                inits: inits.clone(),
            }) as Arc<dyn Module>],
        )
        .unwrap();
        context.startup().await.unwrap();
        context
            .scheduler
            .set_trigger("module_check", JobTrigger::Interval { seconds: 600 })
            .unwrap();

        context.bus.publish(EventType::SystemReload, json!({}));

        let counter = inits.clone();
        assert!(wait_until(5, || counter.load(Ordering::SeqCst) == 2).await);
        assert!(wait_until(5, || next_run(&context, "module_check").is_some()).await);

        context.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_startup_failure_leaves_context_stoppable() {
        let root = TempDir::new().unwrap();
        let mut settings = test_settings(&root);
        // A plain file where the log directory should be
        let blocker = root.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();
        settings.feeds.log_dir = blocker.join("logs");

        let context = AppContext::build(settings).unwrap();
        let err = context.startup().await.unwrap_err();
        assert!(format!("{:#}", err).contains("resources"));

        let report = context.orchestrator.shutdown().await;
        assert!(report.is_clean(), "{:?}", report);
    }
}
