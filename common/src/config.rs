// Configuration management with layered configuration (defaults, file, env)

use crate::schedule::{parse_timezone, JobTrigger};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub app: AppConfig,
    pub observability: ObservabilityConfig,
    pub event_bus: EventBusConfig,
    pub feeds: FeedsConfig,
    pub scheduler: SchedulerSettings,
    pub commands: CommandsConfig,
    pub plugins: PluginsConfig,
    pub lifecycle: LifecycleConfig,
    pub site_auth: SiteAuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
    /// Dev mode skips the menu broadcast and logs notifications instead of publishing them
    #[serde(default)]
    pub dev: bool,
    /// Read commands from stdin
    #[serde(default)]
    pub console: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsConfig {
    pub progress_interval_ms: u64,
    pub message_interval_ms: u64,
    pub log_interval_ms: u64,
    pub log_dir: PathBuf,
    pub log_file: String,
    pub tail_length: usize,
}

impl FeedsConfig {
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(&self.log_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: String,
    pub trigger: JobTrigger,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub poll_interval_seconds: u64,
    pub timezone: String,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// Command that runs a scheduler job by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCommandConfig {
    pub key: String,
    pub job_id: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default)]
    pub jobs: Vec<JobCommandConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    pub manifest_dir: PathBuf,
    /// Manifest directory polling; unset disables the monitor
    #[serde(default)]
    pub watch_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub stop_timeout_seconds: u64,
    pub worker_drain_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteAuthConfig {
    pub auth_level: u8,
    #[serde(default)]
    pub link: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Built-in defaults, so partial files are enough
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.app.name.trim().is_empty() {
            return Err("Application name cannot be empty".to_string());
        }
        if self.app.version.trim().is_empty() {
            return Err("Application version cannot be empty".to_string());
        }

        if self.event_bus.capacity == 0 {
            return Err("Event bus capacity must be greater than 0".to_string());
        }

        if self.feeds.progress_interval_ms == 0
            || self.feeds.message_interval_ms == 0
            || self.feeds.log_interval_ms == 0
        {
            return Err("Feed intervals must be greater than 0".to_string());
        }
        if self.feeds.log_file.trim().is_empty() {
            return Err("Feed log_file cannot be empty".to_string());
        }

        if self.scheduler.poll_interval_seconds == 0 {
            return Err("Scheduler poll_interval_seconds must be greater than 0".to_string());
        }
        parse_timezone(&self.scheduler.timezone).map_err(|e| e.to_string())?;
        for job in &self.scheduler.jobs {
            if job.id.trim().is_empty() {
                return Err("Scheduler job id cannot be empty".to_string());
            }
            job.trigger
                .validate()
                .map_err(|e| format!("Scheduler job '{}': {}", job.id, e))?;
        }

        for command in &self.commands.jobs {
            if !command.key.starts_with('/') || command.key.len() < 2 {
                return Err(format!(
                    "Command key '{}' must start with '/' and name a command",
                    command.key
                ));
            }
            if command.job_id.trim().is_empty() {
                return Err(format!("Command '{}' has an empty job_id", command.key));
            }
        }

        if self.plugins.watch_interval_seconds == Some(0) {
            return Err("Plugin watch_interval_seconds must be greater than 0".to_string());
        }

        if self.lifecycle.stop_timeout_seconds == 0 {
            return Err("Lifecycle stop_timeout_seconds must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle.stop_timeout_seconds)
    }

    pub fn worker_drain_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle.worker_drain_seconds)
    }

    pub fn plugin_watch_interval(&self) -> Option<Duration> {
        self.plugins.watch_interval_seconds.map(Duration::from_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app: AppConfig {
                name: "command-daemon".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                dev: false,
                console: false,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: false,
                metrics_port: None,
            },
            event_bus: EventBusConfig {
                capacity: crate::events::DEFAULT_CAPACITY,
            },
            feeds: FeedsConfig {
                progress_interval_ms: 200,
                message_interval_ms: 3000,
                log_interval_ms: 1000,
                log_dir: PathBuf::from("logs"),
                log_file: "daemon.log".to_string(),
                tail_length: 50,
            },
            scheduler: SchedulerSettings {
                poll_interval_seconds: 1,
                timezone: "UTC".to_string(),
                jobs: Vec::new(),
            },
            commands: CommandsConfig::default(),
            plugins: PluginsConfig {
                manifest_dir: PathBuf::from("plugins"),
                watch_interval_seconds: None,
            },
            lifecycle: LifecycleConfig {
                stop_timeout_seconds: 10,
                worker_drain_seconds: 5,
            },
            site_auth: SiteAuthConfig {
                auth_level: 2,
                link: None,
            },
        }
    }
}
