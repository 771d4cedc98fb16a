use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of events carried by the in-process bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A textual command to run through the dispatcher
    #[serde(rename = "command.execute")]
    CommandExecute,
    /// The assembled command menu, for channel frontends
    #[serde(rename = "command.register")]
    CommandRegister,
    /// An action relayed on behalf of a plugin command
    #[serde(rename = "plugin.action")]
    PluginAction,
    /// Plugin manifests changed on disk and were re-synced
    #[serde(rename = "plugin.reload")]
    PluginReload,
    /// A user notification to deliver through the channels
    #[serde(rename = "notice.message")]
    NoticeMessage,
    /// Hot-reload modules, scheduler and monitor
    #[serde(rename = "system.reload")]
    SystemReload,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CommandExecute => "command.execute",
            EventType::CommandRegister => "command.register",
            EventType::PluginAction => "plugin.action",
            EventType::PluginReload => "plugin.reload",
            EventType::NoticeMessage => "notice.message",
            EventType::SystemReload => "system.reload",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub data: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            data,
            published_at: Utc::now(),
        }
    }
}
