// Command registry
//
// Read-mostly map of command key to descriptor. Every mutation builds a complete
// new map and swaps it in, so concurrent dispatchers always see either the old or
// the new set, never a partially merged one.

use crate::command::handler::{CallShape, CommandHandler};
use crate::errors::RegistrationError;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// What running a command does
#[derive(Debug, Clone)]
pub enum CommandAction {
    /// Run a named scheduler job
    SchedulerJob { job_id: String },
    /// Invoke a handler, optionally with static data bound at registration
    Handler {
        handler: CommandHandler,
        static_data: Option<Value>,
    },
}

#[derive(Debug, Clone)]
pub struct Command {
    pub key: String,
    pub description: String,
    pub category: Option<String>,
    pub action: CommandAction,
}

/// Serializable view of a command, used for menus and help text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    pub cmd: String,
    pub desc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

fn validate_key(key: &str) -> Result<(), RegistrationError> {
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(RegistrationError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn validate_static_data(key: &str, data: &Value) -> Result<(), RegistrationError> {
    let invalid = |reason: &str| RegistrationError::InvalidStaticData {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    let object = data.as_object().ok_or_else(|| invalid("must be a JSON object"))?;
    match object.get("data") {
        None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(invalid("the 'data' entry must be a JSON object")),
    }
}

impl Command {
    /// Build a handler command, checking that the handler's shape is the one its
    /// arity and static data classify to.
    pub fn handler(
        key: impl Into<String>,
        description: impl Into<String>,
        handler: CommandHandler,
        static_data: Option<Value>,
    ) -> Result<Self, RegistrationError> {
        let key = key.into();
        validate_key(&key)?;

        let expected = CallShape::classify(handler.arity(), static_data.is_some())?;
        if expected != handler.shape() {
            return Err(RegistrationError::ShapeMismatch {
                key,
                declared: handler.shape(),
                expected,
            });
        }
        if expected == CallShape::BoundData {
            if let Some(data) = &static_data {
                validate_static_data(&key, data)?;
            }
        }

        Ok(Self {
            key,
            description: description.into(),
            category: None,
            action: CommandAction::Handler {
                handler,
                static_data,
            },
        })
    }

    pub fn job(
        key: impl Into<String>,
        description: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Result<Self, RegistrationError> {
        let key = key.into();
        validate_key(&key)?;
        Ok(Self {
            key,
            description: description.into(),
            category: None,
            action: CommandAction::SchedulerJob {
                job_id: job_id.into(),
            },
        })
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn is_scheduler_job(&self) -> bool {
        matches!(self.action, CommandAction::SchedulerJob { .. })
    }

    pub fn info(&self) -> CommandInfo {
        CommandInfo {
            cmd: self.key.clone(),
            desc: self.description.clone(),
            category: self.category.clone(),
        }
    }
}

type CommandMap = HashMap<String, Arc<Command>>;

#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: RwLock<Arc<CommandMap>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current immutable view of the registry
    pub fn snapshot(&self) -> Arc<CommandMap> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register a command, replacing any existing entry with the same key.
    ///
    /// Returns the replaced command, if any.
    pub fn register(&self, command: Command) -> Option<Arc<Command>> {
        let mut guard = self.commands.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = CommandMap::clone(&guard);
        let key = command.key.clone();
        let previous = next.insert(key.clone(), Arc::new(command));
        *guard = Arc::new(next);

        if previous.is_some() {
            debug!(command = %key, "Command overwritten");
        } else {
            debug!(command = %key, "Command registered");
        }
        previous
    }

    pub fn register_handler(
        &self,
        key: &str,
        description: &str,
        handler: CommandHandler,
        static_data: Option<Value>,
    ) -> Result<(), RegistrationError> {
        self.register(Command::handler(key, description, handler, static_data)?);
        Ok(())
    }

    pub fn register_job(
        &self,
        key: &str,
        description: &str,
        job_id: &str,
    ) -> Result<(), RegistrationError> {
        self.register(Command::job(key, description, job_id)?);
        Ok(())
    }

    /// Replace the whole command set at once; later entries win on duplicate keys.
    ///
    /// Returns the number of distinct commands.
    pub fn rebuild(&self, commands: impl IntoIterator<Item = Command>) -> usize {
        let next: CommandMap = commands
            .into_iter()
            .map(|command| (command.key.clone(), Arc::new(command)))
            .collect();
        let count = next.len();
        *self.commands.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        info!(commands = count, "Command registry rebuilt");
        count
    }

    pub fn get(&self, key: &str) -> Option<Arc<Command>> {
        self.snapshot().get(key).cloned()
    }

    /// All commands, ordered by key
    pub fn list(&self) -> Vec<Arc<Command>> {
        let mut commands: Vec<_> = self.snapshot().values().cloned().collect();
        commands.sort_by(|a, b| a.key.cmp(&b.key));
        commands
    }

    pub fn menu(&self) -> Vec<CommandInfo> {
        self.list().iter().map(|command| command.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
