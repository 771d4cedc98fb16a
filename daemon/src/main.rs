// Daemon binary entry point
//
// Loads settings, boots every subsystem in order and blocks until a stop is
// requested by a signal or the /restart command.

use anyhow::Context;
use common::bootstrap::AppContext;
use common::config::Settings;
use common::models::{CommandOrigin, MessageChannel};
use common::stop::StopFlag;
use common::telemetry;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.json_logs,
    )?;
    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    info!(
        app = %settings.app.name,
        version = %settings.app.version,
        dev = settings.app.dev,
        "Starting daemon"
    );

    let console = settings.app.console;
    let context = Arc::new(AppContext::build(settings)?);

    if let Err(e) = context.startup().await {
        error!(error = %format!("{:#}", e), "Startup failed, shutting down");
        let report = context.orchestrator.shutdown().await;
        if !report.is_clean() {
            warn!(failed = ?report.failed, "Some subsystems did not stop cleanly");
        }
        return Err(e);
    }

    if console {
        tokio::spawn(console_loop(context.clone()));
    }

    info!("Daemon is running. Press Ctrl+C to shutdown gracefully");
    let report = context.orchestrator.run_until_stopped(&context.stop).await;
    if report.is_clean() {
        info!(stopped = report.stopped.len(), "Daemon shutdown complete");
    } else {
        warn!(failed = ?report.failed, "Daemon shut down with failures");
    }
    Ok(())
}

/// Each stdin line is submitted as a command from the console user
async fn console_loop(context: Arc<AppContext>) {
    let origin = CommandOrigin::user(MessageChannel::Console, "stdin", "console");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let stop: &StopFlag = &context.stop;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = stop.stopped() => break,
        };
        match line {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = context.submit(line, &origin) {
                    warn!(error = %e, "Failed to submit console command");
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read console input");
                break;
            }
        }
    }
    info!("Console input closed");
}
