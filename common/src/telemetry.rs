// Telemetry module for structured logging and metrics
//
// Logging goes through tracing-subscriber with an EnvFilter (RUST_LOG wins over the
// configured level). Metrics are recorded through the `metrics` facade and exported
// by Prometheus only when a metrics port is configured.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging
///
/// With `json` set, every event is written as one JSON object including the current
/// span; otherwise a human-readable format is used for console sessions.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, json = json, "Structured logging initialized");

    Ok(())
}

/// Initialize Prometheus metrics exporter and describe the application's metrics
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "command_success_total",
        "Total number of commands that completed without error"
    );
    describe_counter!(
        "command_failed_total",
        "Total number of commands whose execution failed or panicked"
    );
    describe_histogram!(
        "command_duration_seconds",
        "Duration of command executions in seconds"
    );
    describe_counter!(
        "scheduler_job_runs_total",
        "Total number of scheduler job runs by outcome"
    );
    describe_counter!(
        "lifecycle_stop_failures_total",
        "Total number of subsystem stop steps that failed or timed out"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_command_success(key: &str) {
    counter!("command_success_total", "command" => key.to_string()).increment(1);
}

#[inline]
pub fn record_command_failure(key: &str) {
    counter!("command_failed_total", "command" => key.to_string()).increment(1);
}

#[inline]
pub fn record_command_duration(key: &str, duration_seconds: f64) {
    histogram!("command_duration_seconds", "command" => key.to_string()).record(duration_seconds);
}

/// Record one scheduler job run; `outcome` is `success`, `failed` or `panicked`
#[inline]
pub fn record_job_run(job_id: &str, outcome: &'static str) {
    counter!(
        "scheduler_job_runs_total",
        "job_id" => job_id.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

#[inline]
pub fn record_stop_failure(subsystem: &str) {
    counter!("lifecycle_stop_failures_total", "subsystem" => subsystem.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_with_valid_level() {
        // A second initialization in the same process reports an error instead of panicking
        let first = init_logging("info", false);
        let second = init_logging("debug", true);
        assert!(first.is_ok() || second.is_err());
    }

    #[test]
    fn test_metrics_recording() {
        record_command_success("/version");
        record_command_failure("/run");
        record_command_duration("/run", 0.25);
        record_job_run("plugin_sync", "success");
        record_stop_failure("scheduler");
    }
}
