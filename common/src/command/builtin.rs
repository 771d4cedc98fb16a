// Built-in commands
//
// Registered before plugin commands, so a plugin may override a built-in key.

use crate::command::handler::CommandHandler;
use crate::command::registry::{Command, CommandRegistry};
use crate::config::JobCommandConfig;
use crate::errors::RegistrationError;
use crate::messages::{MessageQueue, Role};
use crate::models::{CommandOrigin, Notification};
use crate::notify::NotificationSink;
use crate::scheduler::JobRunner;
use crate::stop::StopFlag;
use anyhow::Context;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::info;

const DEFAULT_CATEGORY: &str = "General";

pub struct BuiltinCommands {
    version: String,
    stop_flag: StopFlag,
    notifier: Arc<dyn NotificationSink>,
    jobs: Arc<dyn JobRunner>,
    messages: Arc<MessageQueue>,
    // Weak so the registry does not keep itself alive through /help
    registry: Weak<CommandRegistry>,
    job_commands: Vec<JobCommandConfig>,
}

impl BuiltinCommands {
    pub fn new(
        version: impl Into<String>,
        stop_flag: StopFlag,
        notifier: Arc<dyn NotificationSink>,
        jobs: Arc<dyn JobRunner>,
        messages: Arc<MessageQueue>,
        registry: &Arc<CommandRegistry>,
        job_commands: Vec<JobCommandConfig>,
    ) -> Self {
        Self {
            version: version.into(),
            stop_flag,
            notifier,
            jobs,
            messages,
            registry: Arc::downgrade(registry),
            job_commands,
        }
    }

    /// Built-in handler commands followed by the configured scheduler-job commands
    pub fn commands(&self) -> Result<Vec<Command>, RegistrationError> {
        let mut commands = vec![
            self.version_command()?,
            self.restart_command()?,
            self.help_command()?,
            self.run_command()?,
            self.clear_messages_command()?,
        ];

        for job in &self.job_commands {
            let mut command = Command::job(&job.key, &job.description, &job.job_id)?;
            if let Some(category) = &job.category {
                command = command.with_category(category);
            }
            commands.push(command);
        }
        Ok(commands)
    }

    fn version_command(&self) -> Result<Command, RegistrationError> {
        let version = self.version.clone();
        let notifier = self.notifier.clone();
        let handler = CommandHandler::triple(move |channel, userid, source| {
            let notifier = notifier.clone();
            let origin = CommandOrigin {
                channel,
                source,
                userid,
            };
            let title = format!("Current version: {}", version);
            async move { notifier.post(Notification::reply_to(&origin, title)).await }
        });
        Ok(Command::handler("/version", "Current version", handler, None)?
            .with_category("Maintenance"))
    }

    fn restart_command(&self) -> Result<Command, RegistrationError> {
        let stop_flag = self.stop_flag.clone();
        let notifier = self.notifier.clone();
        let handler = CommandHandler::triple(move |channel, userid, source| {
            let stop_flag = stop_flag.clone();
            let notifier = notifier.clone();
            let origin = CommandOrigin {
                channel,
                source,
                userid,
            };
            async move {
                info!(user = origin.acting_user(), "Restart requested");
                stop_flag.stop();
                notifier
                    .post(Notification::reply_to(&origin, "Restarting ..."))
                    .await
            }
        });
        Ok(Command::handler("/restart", "Restart the service", handler, None)?
            .with_category("Maintenance"))
    }

    fn help_command(&self) -> Result<Command, RegistrationError> {
        let registry = self.registry.clone();
        let notifier = self.notifier.clone();
        let handler = CommandHandler::triple(move |channel, userid, source| {
            let registry = registry.clone();
            let notifier = notifier.clone();
            let origin = CommandOrigin {
                channel,
                source,
                userid,
            };
            async move {
                let registry = registry
                    .upgrade()
                    .context("Command registry is no longer available")?;
                let text = help_text(&registry);
                notifier
                    .post(Notification::reply_to(&origin, "Available commands").with_text(text))
                    .await
            }
        });
        Command::handler("/help", "List available commands", handler, None)
    }

    fn run_command(&self) -> Result<Command, RegistrationError> {
        let jobs = self.jobs.clone();
        let messages = self.messages.clone();
        let notifier = self.notifier.clone();
        let handler = CommandHandler::full(move |arg_str, channel, userid, source| {
            let jobs = jobs.clone();
            let messages = messages.clone();
            let notifier = notifier.clone();
            let origin = CommandOrigin {
                channel,
                source,
                userid,
            };
            async move {
                let job_id = arg_str.trim();
                if job_id.is_empty() {
                    messages.put("Usage: /run <job_id>", "", Role::System);
                    return Ok(());
                }
                jobs.run_job(job_id).await?;
                if origin.acting_user().is_some() {
                    notifier
                        .post(Notification::reply_to(
                            &origin,
                            format!("Job {} completed", job_id),
                        ))
                        .await?;
                }
                Ok(())
            }
        });
        Ok(Command::handler("/run", "Run a scheduler job now", handler, None)?
            .with_category("Scheduler"))
    }

    fn clear_messages_command(&self) -> Result<Command, RegistrationError> {
        let messages = self.messages.clone();
        let handler = CommandHandler::zero_arg(move || {
            let messages = messages.clone();
            async move {
                messages.clear();
                Ok(())
            }
        });
        Ok(Command::handler("/clear_messages", "Clear pending messages", handler, None)?
            .with_category("Maintenance"))
    }
}

/// Commands grouped by category, one `key - description` line each
pub fn help_text(registry: &CommandRegistry) -> String {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for command in registry.list() {
        let category = command
            .category
            .clone()
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        groups
            .entry(category)
            .or_default()
            .push(format!("{} - {}", command.key, command.description));
    }

    groups
        .into_iter()
        .map(|(category, lines)| format!("[{}]\n{}", category, lines.join("\n")))
        .collect::<Vec<_>>()
        .join("\n\n")
}
