// Command dispatcher
//
// Resolves a key against the registry, binds arguments by call shape, and runs the
// command inside a failure boundary. Errors and panics end up as one system message
// and never reach the caller.

use crate::command::handler::CommandHandler;
use crate::command::registry::{Command, CommandAction, CommandRegistry};
use crate::events::Event;
use crate::messages::{MessageQueue, Role};
use crate::models::{CommandOrigin, ExecutionEvent, Notification};
use crate::notify::NotificationSink;
use crate::scheduler::JobRunner;
use crate::telemetry;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No command is registered under the key
    NotFound,
    Completed,
    /// The command failed; the reason was recorded as a system message
    Failed(String),
}

pub struct CommandDispatcher {
    registry: Arc<CommandRegistry>,
    jobs: Arc<dyn JobRunner>,
    notifier: Arc<dyn NotificationSink>,
    messages: Arc<MessageQueue>,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<CommandRegistry>,
        jobs: Arc<dyn JobRunner>,
        notifier: Arc<dyn NotificationSink>,
        messages: Arc<MessageQueue>,
    ) -> Self {
        Self {
            registry,
            jobs,
            notifier,
            messages,
        }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Execute the command registered under `key`.
    ///
    /// Unknown keys are ignored. Failures are logged and recorded as a system message.
    #[instrument(skip(self, arg_str, origin), fields(command = %key))]
    pub async fn execute(&self, key: &str, arg_str: &str, origin: &CommandOrigin) -> DispatchOutcome {
        let Some(command) = self.registry.get(key) else {
            trace!("No command registered under key, ignoring");
            return DispatchOutcome::NotFound;
        };

        let user = origin.acting_user();
        info!(
            description = %command.description,
            user = user,
            "Executing command"
        );

        let started = Instant::now();
        let result = AssertUnwindSafe(self.run(&command, arg_str, origin))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(())) => {
                telemetry::record_command_success(key);
                DispatchOutcome::Completed
            }
            Ok(Err(e)) => self.record_failure(&command, format!("{:#}", e)),
            Err(panic) => self.record_failure(&command, panic_message(panic.as_ref())),
        };
        telemetry::record_command_duration(key, started.elapsed().as_secs_f64());

        info!(
            description = %command.description,
            user = user,
            outcome = ?outcome,
            "Command finished"
        );
        outcome
    }

    async fn run(
        &self,
        command: &Command,
        arg_str: &str,
        origin: &CommandOrigin,
    ) -> anyhow::Result<()> {
        match &command.action {
            CommandAction::SchedulerJob { job_id } => {
                let notify = origin.acting_user().is_some();
                if notify {
                    self.post(Notification::reply_to(
                        origin,
                        format!("Starting {} ...", command.description),
                    ))
                    .await;
                }

                self.jobs.run_job(job_id).await?;

                if notify {
                    self.post(Notification::reply_to(
                        origin,
                        format!("{} completed", command.description),
                    ))
                    .await;
                }
                Ok(())
            }
            CommandAction::Handler {
                handler,
                static_data,
            } => match handler {
                CommandHandler::ZeroArg(f) => f().await,
                CommandHandler::Triple(f) => {
                    f(
                        origin.channel,
                        origin.userid.clone(),
                        origin.source.clone(),
                    )
                    .await
                }
                CommandHandler::Full(f) => {
                    f(
                        arg_str.to_string(),
                        origin.channel,
                        origin.userid.clone(),
                        origin.source.clone(),
                    )
                    .await
                }
                CommandHandler::BoundData(f) => {
                    let base = static_data.clone().unwrap_or_else(|| Value::Object(Map::new()));
                    f(bind_static_data(base, arg_str, origin)).await
                }
            },
        }
    }

    async fn post(&self, notification: Notification) {
        if let Err(e) = self.notifier.post(notification).await {
            warn!(error = %e, "Failed to post notification");
        }
    }

    fn record_failure(&self, command: &Command, reason: String) -> DispatchOutcome {
        error!(command = %command.key, error = %reason, "Command execution failed");
        telemetry::record_command_failure(&command.key);
        self.messages.put(
            format!("Command {} failed", command.key),
            reason.clone(),
            Role::System,
        );
        DispatchOutcome::Failed(reason)
    }

    /// Run the command named by an execution event's `cmd` text.
    ///
    /// The text is split at the first whitespace into key and argument string.
    pub async fn handle_event(&self, event: &ExecutionEvent) -> DispatchOutcome {
        let Some((key, arg_str)) = event.split() else {
            debug!("Blank command in execution event, ignoring");
            return DispatchOutcome::NotFound;
        };
        self.execute(key, &arg_str, &event.origin()).await
    }

    /// Entry point for `command.execute` events delivered by the bus
    pub async fn handle_bus_event(&self, event: Event) {
        match serde_json::from_value::<ExecutionEvent>(event.data) {
            Ok(execution) => {
                self.handle_event(&execution).await;
            }
            Err(e) => warn!(event_id = %event.id, error = %e, "Malformed execution event"),
        }
    }
}

/// Merge the call context into the `data` object of a command's static data.
///
/// `arg_str` is only added when non-empty. The rest of the static data is kept as is.
pub fn bind_static_data(mut static_data: Value, arg_str: &str, origin: &CommandOrigin) -> Value {
    if !static_data.is_object() {
        static_data = Value::Object(Map::new());
    }
    let Value::Object(root) = &mut static_data else {
        return static_data;
    };

    let data = root
        .entry("data")
        .or_insert_with(|| Value::Object(Map::new()));
    if !data.is_object() {
        *data = Value::Object(Map::new());
    }
    if let Value::Object(data) = data {
        data.insert(
            "channel".to_string(),
            origin
                .channel
                .map(|channel| Value::String(channel.to_string()))
                .unwrap_or(Value::Null),
        );
        data.insert(
            "source".to_string(),
            origin.source.clone().map(Value::String).unwrap_or(Value::Null),
        );
        data.insert(
            "user".to_string(),
            origin.userid.clone().map(Value::String).unwrap_or(Value::Null),
        );
        if !arg_str.is_empty() {
            data.insert("arg_str".to_string(), Value::String(arg_str.to_string()));
        }
    }
    static_data
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
